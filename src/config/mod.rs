mod constants;

pub use constants::{
    DEFAULT_CACHE_SIZE, FREE_LOOKUP_DEPTH_MIN, FREE_LOOKUP_RATIO, MIN_CACHE_SIZE, NOT_FOUND,
    PAGE_SIZE,
};

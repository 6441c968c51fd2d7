#![allow(dead_code)]

pub use cardwatch_test_utils::builders;
pub use cardwatch_test_utils::fakes;
pub use cardwatch_test_utils::scripts;
pub use cardwatch_test_utils::{init_tracing, with_timeout};

//! Utilities shared by the collector: object references, options and logging.

pub mod logger;
pub mod object;
pub mod options;

#[cfg(any(test, feature = "mock_test"))]
pub mod test_util;

pub use self::object::GcHeader;
pub use self::object::ObjectReference;
pub use self::options::Options;

pub mod enums;
pub mod raw;
pub mod vital_sign;
pub mod nutrition;
pub mod lab;
pub mod terminology;
pub mod aggregate;

pub use enums::*;
pub use raw::*;
pub use vital_sign::*;
pub use nutrition::*;
pub use lab::*;
pub use terminology::*;
pub use aggregate::*;

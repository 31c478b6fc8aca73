pub mod types;
pub mod models;
pub mod capture;
pub mod job;
pub mod manager;


pub use types::*;
pub use models::*;
pub use capture::*;
pub use job::*;
pub use manager::*;

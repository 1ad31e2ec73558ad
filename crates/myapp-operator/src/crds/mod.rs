pub mod defaults;
pub mod myapp;

pub use myapp::{MyApp, MyAppSpec, MyAppStatus};

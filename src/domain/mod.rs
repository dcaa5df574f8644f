pub mod sales;

pub use sales::*;

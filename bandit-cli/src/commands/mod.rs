pub mod register;
pub mod reload;
pub mod serve;

pub mod health;
pub mod progress_ws;
pub mod wallet;

pub mod download;
pub mod files;
pub mod health;
pub mod pool;
pub mod upload;

pub mod board;
pub mod device;
pub mod fan;
pub mod hashrate;
pub mod miner;
pub mod pool;
pub mod profile;

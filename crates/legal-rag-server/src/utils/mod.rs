pub mod chinese_num;
pub mod error;
pub mod limiters;
pub mod retry;
pub mod similarity;
pub mod token_estimator;

pub mod answers;
pub mod health;
pub mod queries;
pub mod search;

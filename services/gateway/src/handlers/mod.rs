pub mod candidate;
pub mod vote;
pub mod ws;

pub mod attendance;
pub mod calc;
pub mod core;
pub mod report_cards;
pub mod scores;
pub mod setup;
pub mod weights;

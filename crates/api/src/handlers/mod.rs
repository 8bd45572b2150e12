pub mod cards;
pub mod redeem;
pub mod settings;
pub mod transfer;

mod accounts;
mod battles;
mod dev;
mod players;
mod tracking;

pub use accounts::accounts;
pub use dev::dev;
pub use players::players;
pub use tracking::tracking;

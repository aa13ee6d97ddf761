pub mod autocomplete;
pub mod bot;
pub mod checks;
pub mod commands;
pub mod confirm;
pub mod embeds;
pub mod paginate;
pub mod report;

pub use bot::{Data, create_framework};

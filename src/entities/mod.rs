pub mod prelude;

pub mod item_vote;
pub mod profile;
pub mod votable_item;
pub mod voting_completion;

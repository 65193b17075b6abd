#![allow(unused_imports)]

pub use super::item_vote::Entity as ItemVote;
pub use super::profile::Entity as Profile;
pub use super::votable_item::Entity as VotableItem;
pub use super::voting_completion::Entity as VotingCompletion;

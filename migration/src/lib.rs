pub use sea_orm_migration::prelude::*;

mod m20261018_000001_create_profiles;
mod m20261018_000002_create_votable_items;
mod m20261018_000003_create_item_votes;
mod m20261018_000004_create_voting_completions;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261018_000001_create_profiles::Migration),
            Box::new(m20261018_000002_create_votable_items::Migration),
            Box::new(m20261018_000003_create_item_votes::Migration),
            Box::new(m20261018_000004_create_voting_completions::Migration),
        ]
    }
}

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Keyed by item so a terminal transition can only be recorded once.
        manager
            .create_table(
                Table::create()
                    .table(VotingCompletions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(VotingCompletions::ItemId)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(VotingCompletions::ItemKind)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VotingCompletions::FinalStatus)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VotingCompletions::VotesFor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VotingCompletions::VotesAgainst)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VotingCompletions::VotesAbstain)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VotingCompletions::TotalVotes)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VotingCompletions::TotalEligibleVoters)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VotingCompletions::CompletedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VotingCompletions::NotifiedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_voting_completions_item")
                            .from(VotingCompletions::Table, VotingCompletions::ItemId)
                            .to(VotableItems::Table, VotableItems::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .index(
                        Index::create()
                            .name("idx_voting_completions_pending")
                            .col(VotingCompletions::NotifiedAt)
                            .col(VotingCompletions::CompletedAt),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(VotingCompletions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum VotingCompletions {
    Table,
    ItemId,
    ItemKind,
    FinalStatus,
    VotesFor,
    VotesAgainst,
    VotesAbstain,
    TotalVotes,
    TotalEligibleVoters,
    CompletedAt,
    NotifiedAt,
}

#[derive(DeriveIden)]
enum VotableItems {
    Table,
    Id,
}

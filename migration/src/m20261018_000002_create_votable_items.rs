use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_query::Expr;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(VotableItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(VotableItems::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    // "resolution" or "minutes"
                    .col(ColumnDef::new(VotableItems::Kind).string_len(16).not_null())
                    .col(
                        ColumnDef::new(VotableItems::Title)
                            .string_len(256)
                            .not_null(),
                    )
                    .col(ColumnDef::new(VotableItems::Description).text().null())
                    .col(
                        ColumnDef::new(VotableItems::Status)
                            .string_len(16)
                            .not_null()
                            .default("draft"),
                    )
                    .col(
                        ColumnDef::new(VotableItems::VotingDeadline)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(VotableItems::ApprovalThresholdPercent)
                            .integer()
                            .not_null()
                            .default(50),
                    )
                    .col(
                        ColumnDef::new(VotableItems::MinimumQuorumPercent)
                            .integer()
                            .not_null()
                            .default(50),
                    )
                    .col(
                        ColumnDef::new(VotableItems::TotalEligibleVoters)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(VotableItems::VotesFor)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(VotableItems::VotesAgainst)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(VotableItems::VotesAbstain)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(VotableItems::TotalVotes)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(VotableItems::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(VotableItems::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(VotableItems::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .index(
                        Index::create()
                            .name("idx_votable_items_kind_status")
                            .col(VotableItems::Kind)
                            .col(VotableItems::Status),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(VotableItems::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum VotableItems {
    Table,
    Id,
    Kind,
    Title,
    Description,
    Status,
    VotingDeadline,
    ApprovalThresholdPercent,
    MinimumQuorumPercent,
    TotalEligibleVoters,
    VotesFor,
    VotesAgainst,
    VotesAbstain,
    TotalVotes,
    CompletedAt,
    CreatedAt,
    UpdatedAt,
}

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
                    .table(ItemVotes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ItemVotes::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ItemVotes::ItemId).big_integer().not_null())
                    .col(
                        ColumnDef::new(ItemVotes::VoterId)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(ColumnDef::new(ItemVotes::Choice).string_len(16).not_null())
                    .col(ColumnDef::new(ItemVotes::Reason).text().null())
                    .col(
                        ColumnDef::new(ItemVotes::CastAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ItemVotes::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_item_votes_item")
                            .from(ItemVotes::Table, ItemVotes::ItemId)
                            .to(VotableItems::Table, VotableItems::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One ballot per voter per item; casts are upserts against this index.
        manager
            .create_index(
                Index::create()
                    .name("uq_item_votes_item_voter")
                    .table(ItemVotes::Table)
                    .col(ItemVotes::ItemId)
                    .col(ItemVotes::VoterId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ItemVotes::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ItemVotes {
    Table,
    Id,
    ItemId,
    VoterId,
    Choice,
    Reason,
    CastAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum VotableItems {
    Table,
    Id,
}

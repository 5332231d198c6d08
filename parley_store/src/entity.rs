pub mod transcripts {
    use sea_orm::entity::prelude::*;

    /// One row per conversation, turns stored as a JSON array.
    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "transcripts")]
    pub struct Model {
        /// `user:conversation_id`
        #[sea_orm(primary_key, auto_increment = false)]
        pub key: String,
        pub user_id: String,
        pub conversation_id: Uuid,
        #[sea_orm(column_type = "Text")]
        pub turns: String,
        pub turn_count: i32,
        pub created_at: DateTime,
        pub updated_at: DateTime,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

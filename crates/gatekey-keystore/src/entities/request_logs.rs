use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "request_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub request_id: String,
    pub request_time: OffsetDateTime,
    pub key_identifier: Option<String>,
    pub key_brief: Option<String>,
    pub tenant_alias: Option<String>,
    pub model_name: String,
    pub is_success: bool,
    pub error_type: Option<String>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    #[sea_orm(
        belongs_to,
        from = "key_identifier",
        to = "identifier",
        on_delete = "Cascade"
    )]
    pub key: HasOne<super::upstream_keys::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}

use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "upstream_keys")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub identifier: String,
    /// Short human-readable redaction (e.g. first-4/last-4 of the secret). Never the secret itself.
    pub brief: String,
    /// The credential. Never logged or returned from any read API.
    pub secret: String,
}

impl ActiveModelBehavior for ActiveModel {}

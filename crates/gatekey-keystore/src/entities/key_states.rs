use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "key_states")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub identifier: String,
    /// Epoch seconds; 0 while not cooling.
    pub cool_down_until: f64,
    pub request_fail_count: i32,
    pub cool_down_entry_count: i32,
    pub current_cool_down_seconds: i64,
    /// Epoch seconds; updated whenever the key is handed out.
    pub last_usage_time: f64,
    pub is_in_use: bool,
    pub is_cooled_down: bool,
    #[sea_orm(
        belongs_to,
        from = "identifier",
        to = "identifier",
        on_delete = "Cascade"
    )]
    pub key: HasOne<super::upstream_keys::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn fresh(identifier: String, initial_cool_down_seconds: i64) -> Self {
        Self {
            identifier,
            cool_down_until: 0.0,
            request_fail_count: 0,
            cool_down_entry_count: 0,
            current_cool_down_seconds: initial_cool_down_seconds,
            last_usage_time: 0.0,
            is_in_use: false,
            is_cooled_down: false,
        }
    }

    /// `AVAILABLE`, `IN_USE` and `COOLING` are mutually exclusive by construction.
    pub fn is_available(&self) -> bool {
        !self.is_in_use && !self.is_cooled_down
    }
}

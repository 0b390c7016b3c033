use async_trait::async_trait;
use sea_orm::{
    AccessMode, ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr,
    EntityTrait, IsolationLevel, QueryFilter, QueryOrder, QuerySelect, Schema, TransactionTrait,
};

use crate::entities::{self, key_states, request_logs, upstream_keys};

pub type UpstreamKey = upstream_keys::Model;
pub type KeyState = key_states::Model;
pub type RequestLog = request_logs::Model;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("db error: {0}")]
    Db(#[from] DbErr),
    #[error("unknown key identifier: {0}")]
    UnknownKey(String),
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct KeyCounts {
    pub total: u64,
    pub in_use: u64,
    pub cooled: u64,
    pub available: u64,
}

/// Durable, transactional storage of every upstream key's state.
///
/// `pick_next_available_and_lock` is the one operation whose atomicity is
/// load-bearing: two concurrent callers must never be handed the same key.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn add(&self, identifier: &str, secret: &str, brief: &str) -> StoreResult<()>;
    async fn delete(&self, identifier: &str) -> StoreResult<()>;
    async fn reset(&self, identifier: &str) -> StoreResult<()>;
    async fn reset_all(&self) -> StoreResult<()>;

    async fn get_state(&self, identifier: &str) -> StoreResult<Option<KeyState>>;
    async fn get_key(&self, identifier: &str) -> StoreResult<Option<UpstreamKey>>;
    async fn list_all(&self) -> StoreResult<Vec<KeyState>>;

    async fn pick_next_available_and_lock(&self) -> StoreResult<Option<UpstreamKey>>;
    async fn move_to_cooldown(&self, identifier: &str, cool_down_until: f64) -> StoreResult<()>;
    async fn release_from_use(&self, identifier: &str) -> StoreResult<()>;
    async fn reactivate(&self, identifier: &str) -> StoreResult<()>;

    async fn list_releasable(&self, now: f64) -> StoreResult<Vec<UpstreamKey>>;
    async fn list_in_use(&self) -> StoreResult<Vec<UpstreamKey>>;
    async fn counts(&self) -> StoreResult<KeyCounts>;
    async fn min_cool_down_until(&self) -> StoreResult<Option<f64>>;

    async fn save_state(&self, state: &KeyState) -> StoreResult<()>;

    async fn append_log(&self, log: NewRequestLog<'_>) -> StoreResult<()>;
}

/// Fields needed to append one `RequestLog` row; `id` is DB-assigned.
pub struct NewRequestLog<'a> {
    pub request_id: &'a str,
    pub request_time: time::OffsetDateTime,
    pub key_identifier: Option<&'a str>,
    pub key_brief: Option<&'a str>,
    pub tenant_alias: Option<&'a str>,
    pub model_name: &'a str,
    pub is_success: bool,
    pub error_type: Option<&'a str>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
}

pub struct SeaOrmKeyStore {
    db: DatabaseConnection,
}

impl SeaOrmKeyStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn connect(dsn: &str) -> Result<Self, DbErr> {
        Ok(Self::new(crate::db::connect_shared(dsn).await?))
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn sync(&self) -> Result<(), DbErr> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::UpstreamKeys)
            .register(entities::KeyStates)
            .register(entities::RequestLogs)
            .sync(&self.db)
            .await
    }
}

#[async_trait]
impl KeyStore for SeaOrmKeyStore {
    async fn add(&self, identifier: &str, secret: &str, brief: &str) -> StoreResult<()> {
        let txn = self.db.begin().await?;
        upstream_keys::ActiveModel {
            identifier: Set(identifier.to_string()),
            secret: Set(secret.to_string()),
            brief: Set(brief.to_string()),
        }
        .insert(&txn)
        .await?;
        let fresh = key_states::Model::fresh(identifier.to_string(), 0);
        key_states::ActiveModel {
            identifier: Set(fresh.identifier),
            cool_down_until: Set(fresh.cool_down_until),
            request_fail_count: Set(fresh.request_fail_count),
            cool_down_entry_count: Set(fresh.cool_down_entry_count),
            current_cool_down_seconds: Set(fresh.current_cool_down_seconds),
            last_usage_time: Set(fresh.last_usage_time),
            is_in_use: Set(fresh.is_in_use),
            is_cooled_down: Set(fresh.is_cooled_down),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;
        Ok(())
    }

    async fn delete(&self, identifier: &str) -> StoreResult<()> {
        upstream_keys::Entity::delete_by_id(identifier.to_string())
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn reset(&self, identifier: &str) -> StoreResult<()> {
        let Some(state) = key_states::Entity::find_by_id(identifier.to_string())
            .one(&self.db)
            .await?
        else {
            return Err(StoreError::UnknownKey(identifier.to_string()));
        };
        let mut am: key_states::ActiveModel = state.into();
        am.cool_down_until = Set(0.0);
        am.request_fail_count = Set(0);
        am.cool_down_entry_count = Set(0);
        am.is_in_use = Set(false);
        am.is_cooled_down = Set(false);
        am.update(&self.db).await?;
        Ok(())
    }

    async fn reset_all(&self) -> StoreResult<()> {
        let all = key_states::Entity::find().all(&self.db).await?;
        for state in all {
            let mut am: key_states::ActiveModel = state.into();
            am.cool_down_until = Set(0.0);
            am.request_fail_count = Set(0);
            am.cool_down_entry_count = Set(0);
            am.is_in_use = Set(false);
            am.is_cooled_down = Set(false);
            am.update(&self.db).await?;
        }
        Ok(())
    }

    async fn get_state(&self, identifier: &str) -> StoreResult<Option<KeyState>> {
        Ok(key_states::Entity::find_by_id(identifier.to_string())
            .one(&self.db)
            .await?)
    }

    async fn get_key(&self, identifier: &str) -> StoreResult<Option<UpstreamKey>> {
        Ok(upstream_keys::Entity::find_by_id(identifier.to_string())
            .one(&self.db)
            .await?)
    }

    async fn list_all(&self) -> StoreResult<Vec<KeyState>> {
        Ok(key_states::Entity::find()
            .order_by_asc(key_states::Column::IsCooledDown)
            .order_by_desc(key_states::Column::IsInUse)
            .order_by_asc(key_states::Column::LastUsageTime)
            .all(&self.db)
            .await?)
    }

    async fn pick_next_available_and_lock(&self) -> StoreResult<Option<UpstreamKey>> {
        // `Serializable` + `ReadWrite` maps onto `BEGIN IMMEDIATE` on the
        // SQLite backend (sea-query emits no `FOR UPDATE` clause for SQLite,
        // so a plain `db.begin()` + `.lock_exclusive()` is a no-op lock
        // there): this is what actually makes two concurrent callers
        // serialize instead of both reading the same available row under a
        // shared lock and dual-dispatching it.
        let txn = self
            .db
            .begin_with_config(Some(IsolationLevel::Serializable), Some(AccessMode::ReadWrite))
            .await?;

        let candidate = key_states::Entity::find()
            .filter(key_states::Column::IsInUse.eq(false))
            .filter(key_states::Column::IsCooledDown.eq(false))
            .order_by_asc(key_states::Column::LastUsageTime)
            .lock_exclusive()
            .one(&txn)
            .await?;

        let Some(state) = candidate else {
            txn.rollback().await?;
            return Ok(None);
        };

        let identifier = state.identifier.clone();
        let now = now_epoch_seconds();
        let mut am: key_states::ActiveModel = state.into();
        am.is_in_use = Set(true);
        am.last_usage_time = Set(now);
        am.update(&txn).await?;

        let key = upstream_keys::Entity::find_by_id(identifier.clone())
            .one(&txn)
            .await?;
        txn.commit().await?;
        key.ok_or(StoreError::UnknownKey(identifier)).map(Some)
    }

    async fn move_to_cooldown(&self, identifier: &str, cool_down_until: f64) -> StoreResult<()> {
        let Some(state) = key_states::Entity::find_by_id(identifier.to_string())
            .one(&self.db)
            .await?
        else {
            return Err(StoreError::UnknownKey(identifier.to_string()));
        };
        let mut am: key_states::ActiveModel = state.into();
        am.is_cooled_down = Set(true);
        am.is_in_use = Set(false);
        am.cool_down_until = Set(cool_down_until);
        am.update(&self.db).await?;
        Ok(())
    }

    async fn release_from_use(&self, identifier: &str) -> StoreResult<()> {
        let Some(state) = key_states::Entity::find_by_id(identifier.to_string())
            .one(&self.db)
            .await?
        else {
            return Err(StoreError::UnknownKey(identifier.to_string()));
        };
        if !state.is_in_use {
            return Ok(());
        }
        let mut am: key_states::ActiveModel = state.into();
        am.is_in_use = Set(false);
        am.update(&self.db).await?;
        Ok(())
    }

    async fn reactivate(&self, identifier: &str) -> StoreResult<()> {
        let Some(state) = key_states::Entity::find_by_id(identifier.to_string())
            .one(&self.db)
            .await?
        else {
            return Err(StoreError::UnknownKey(identifier.to_string()));
        };
        let mut am: key_states::ActiveModel = state.into();
        am.is_cooled_down = Set(false);
        am.is_in_use = Set(false);
        am.cool_down_until = Set(0.0);
        am.update(&self.db).await?;
        Ok(())
    }

    async fn list_releasable(&self, now: f64) -> StoreResult<Vec<UpstreamKey>> {
        let states = key_states::Entity::find()
            .filter(key_states::Column::IsCooledDown.eq(true))
            .filter(key_states::Column::CoolDownUntil.lte(now))
            .all(&self.db)
            .await?;
        let mut out = Vec::with_capacity(states.len());
        for state in states {
            if let Some(key) = upstream_keys::Entity::find_by_id(state.identifier)
                .one(&self.db)
                .await?
            {
                out.push(key);
            }
        }
        Ok(out)
    }

    async fn list_in_use(&self) -> StoreResult<Vec<UpstreamKey>> {
        let states = key_states::Entity::find()
            .filter(key_states::Column::IsInUse.eq(true))
            .all(&self.db)
            .await?;
        let mut out = Vec::with_capacity(states.len());
        for state in states {
            if let Some(key) = upstream_keys::Entity::find_by_id(state.identifier)
                .one(&self.db)
                .await?
            {
                out.push(key);
            }
        }
        Ok(out)
    }

    async fn counts(&self) -> StoreResult<KeyCounts> {
        let all = key_states::Entity::find().all(&self.db).await?;
        let mut counts = KeyCounts::default();
        for state in &all {
            counts.total += 1;
            if state.is_in_use {
                counts.in_use += 1;
            } else if state.is_cooled_down {
                counts.cooled += 1;
            } else {
                counts.available += 1;
            }
        }
        Ok(counts)
    }

    async fn min_cool_down_until(&self) -> StoreResult<Option<f64>> {
        let min = key_states::Entity::find()
            .filter(key_states::Column::IsCooledDown.eq(true))
            .order_by_asc(key_states::Column::CoolDownUntil)
            .one(&self.db)
            .await?;
        Ok(min.map(|s| s.cool_down_until))
    }

    async fn save_state(&self, state: &KeyState) -> StoreResult<()> {
        let am = key_states::ActiveModel {
            identifier: Set(state.identifier.clone()),
            cool_down_until: Set(state.cool_down_until),
            request_fail_count: Set(state.request_fail_count),
            cool_down_entry_count: Set(state.cool_down_entry_count),
            current_cool_down_seconds: Set(state.current_cool_down_seconds),
            last_usage_time: Set(state.last_usage_time),
            is_in_use: Set(state.is_in_use),
            is_cooled_down: Set(state.is_cooled_down),
        };
        key_states::Entity::update(am).exec(&self.db).await?;
        Ok(())
    }

    async fn append_log(&self, log: NewRequestLog<'_>) -> StoreResult<()> {
        request_logs::ActiveModel {
            id: sea_orm::ActiveValue::NotSet,
            request_id: Set(log.request_id.to_string()),
            request_time: Set(log.request_time),
            key_identifier: Set(log.key_identifier.map(str::to_string)),
            key_brief: Set(log.key_brief.map(str::to_string)),
            tenant_alias: Set(log.tenant_alias.map(str::to_string)),
            model_name: Set(log.model_name.to_string()),
            is_success: Set(log.is_success),
            error_type: Set(log.error_type.map(str::to_string)),
            prompt_tokens: Set(log.prompt_tokens),
            completion_tokens: Set(log.completion_tokens),
            total_tokens: Set(log.total_tokens),
        }
        .insert(&self.db)
        .await?;
        Ok(())
    }
}

fn now_epoch_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

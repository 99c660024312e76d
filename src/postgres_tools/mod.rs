// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::arrival_departure::ArrivalDeparture;
use crate::error::{LarchError, LarchResult};
use crate::historical_store::HistoricalStore;
use crate::models::{ArrivalDepartureRow, VehicleConfigRow};
use crate::vehicle_config::{VehicleConfig, VehicleConfigSource};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::ManagerConfig;
use diesel_async::pooled_connection::RecyclingMethod;
use diesel_async::pooled_connection::bb8::Pool;
use futures::future::BoxFuture;
use std::env;
use std::sync::Arc;
use tracing::{debug, warn};

/// This type alias is the pool, which can be quried for connections.
/// It is typically wrapped in Arc to allow thread safe cloning to the same pool
pub type LarchPostgresPool =
    bb8::Pool<AsyncDieselConnectionManager<diesel_async::AsyncPgConnection>>;

pub async fn make_async_pool(database_url: &str) -> LarchResult<LarchPostgresPool> {
    let mut custom_conf = ManagerConfig::default();

    custom_conf.recycling_method = RecyclingMethod::Fast;

    let config: AsyncDieselConnectionManager<diesel_async::AsyncPgConnection> =
        AsyncDieselConnectionManager::<diesel_async::AsyncPgConnection>::new_with_config(
            database_url,
            custom_conf,
        );
    let pool = Pool::builder()
        .max_size(64)
        .min_idle(Some(16))
        .build(config)
        .await
        .map_err(|e| LarchError::Pool(e.to_string()))?;

    Ok(pool)
}

pub fn database_url_for_env() -> LarchResult<String> {
    env::var("DATABASE_URL").map_err(|_| LarchError::Config(String::from("DATABASE_URL must be set")))
}

/// Converts rows, logging and dropping the ones that do not make sense.
fn rows_to_events(rows: Vec<ArrivalDepartureRow>) -> Vec<ArrivalDeparture> {
    let total = rows.len();
    let events: Vec<ArrivalDeparture> = rows
        .into_iter()
        .filter_map(|row| match ArrivalDeparture::try_from(row) {
            Ok(event) => Some(event),
            Err(err) => {
                warn!("Skipping arrival/departure row: {}", err);
                None
            }
        })
        .collect();

    if events.len() != total {
        warn!("Skipped {} of {} arrival/departure rows", total - events.len(), total);
    }
    events
}

pub struct PostgresHistoricalStore {
    pool: Arc<LarchPostgresPool>,
}

impl PostgresHistoricalStore {
    pub fn new(pool: Arc<LarchPostgresPool>) -> Self {
        Self { pool }
    }
}

impl HistoricalStore for PostgresHistoricalStore {
    fn arrivals_departures_between(
        &self,
        start_ms: u64,
        end_ms: u64,
    ) -> BoxFuture<'_, LarchResult<Vec<ArrivalDeparture>>> {
        use crate::schema::larch::arrivals_departures::dsl;

        Box::pin(async move {
            let mut conn_pre = self
                .pool
                .get()
                .await
                .map_err(|e| LarchError::Pool(e.to_string()))?;
            let conn = &mut conn_pre;

            let start = i64::try_from(start_ms).unwrap_or(i64::MAX);
            let end = i64::try_from(end_ms).unwrap_or(i64::MAX);

            let rows: Vec<ArrivalDepartureRow> = dsl::arrivals_departures
                .filter(dsl::time_ms.ge(start))
                .filter(dsl::time_ms.lt(end))
                .order(dsl::time_ms.asc())
                .select(ArrivalDepartureRow::as_select())
                .load(conn)
                .await?;

            debug!("Read {} arrival/departure rows between {} and {}", rows.len(), start, end);
            Ok(rows_to_events(rows))
        })
    }
}

pub struct PostgresVehicleConfigSource {
    pool: Arc<LarchPostgresPool>,
}

impl PostgresVehicleConfigSource {
    pub fn new(pool: Arc<LarchPostgresPool>) -> Self {
        Self { pool }
    }
}

impl VehicleConfigSource for PostgresVehicleConfigSource {
    fn load_all(&self) -> BoxFuture<'_, LarchResult<Vec<VehicleConfig>>> {
        use crate::schema::larch::vehicle_configs::dsl;

        Box::pin(async move {
            let mut conn_pre = self
                .pool
                .get()
                .await
                .map_err(|e| LarchError::Pool(e.to_string()))?;
            let conn = &mut conn_pre;

            let rows: Vec<VehicleConfigRow> = dsl::vehicle_configs
                .select(VehicleConfigRow::as_select())
                .load(conn)
                .await?;

            Ok(rows.into_iter().map(VehicleConfig::from).collect())
        })
    }

    fn store(&self, config: VehicleConfig) -> BoxFuture<'_, LarchResult<()>> {
        use crate::schema::larch::vehicle_configs::dsl;

        Box::pin(async move {
            let mut conn_pre = self
                .pool
                .get()
                .await
                .map_err(|e| LarchError::Pool(e.to_string()))?;
            let conn = &mut conn_pre;

            diesel::insert_into(dsl::vehicle_configs)
                .values(&VehicleConfigRow::from(&config))
                .on_conflict(dsl::id)
                .do_nothing()
                .execute(conn)
                .await?;

            Ok(())
        })
    }
}

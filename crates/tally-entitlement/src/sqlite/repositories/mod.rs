//! Stateless repositories over the entitlement tables.
//!
//! Every method takes a `&Connection` (which may be a transaction) and the
//! tenant scope of the call. No repository holds state.

pub mod bundle;
pub mod bus_event;
pub mod event;
pub mod notification;
pub mod subscription;

pub use bundle::BundleRepo;
pub use bus_event::{BusEventRepo, StoredBusEvent};
pub use event::{EventAudit, EventRepo};
pub use notification::{NotificationRepo, ScheduledNotification};
pub use subscription::SubscriptionRepo;

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, TimeZone, Utc};
    use rusqlite::Connection;
    use tally_core::{AccountId, CallContext, TenantContext};

    use crate::sqlite::migrations::run_migrations;
    use crate::types::{BundleData, ProductCategory, SubscriptionData};

    use super::{BundleRepo, SubscriptionRepo};

    pub fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        let _ = run_migrations(&conn).unwrap();
        conn
    }

    pub fn ctx() -> CallContext {
        CallContext::new(TenantContext::new(1, 10), "test")
    }

    pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
    }

    pub fn bundle(conn: &Connection, key: &str) -> BundleData {
        let bundle = BundleData::new(AccountId::from("acct-1"), key, at(2021, 1, 1));
        BundleRepo::insert(conn, &bundle, &ctx(), at(2021, 1, 1)).unwrap();
        bundle
    }

    pub fn subscription(
        conn: &Connection,
        bundle: &BundleData,
        category: ProductCategory,
    ) -> SubscriptionData {
        let data =
            SubscriptionData::new(bundle.id.clone(), category, at(2021, 1, 1), bundle.start_date);
        SubscriptionRepo::insert(conn, &data, &ctx(), at(2021, 1, 1)).unwrap();
        data
    }
}

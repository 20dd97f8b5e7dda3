use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context as _, Result};
use rusqlite::{Connection, OptionalExtension as _, params};

use super::{Order, OrderState};

/// Key-value store of orders. Every `put` replaces the full record for the
/// order id (last writer wins); there are no partial updates.
pub trait OrderStore: Send {
    fn get(&self, order_id: &str) -> Result<Option<Order>>;
    fn put(&mut self, order: &Order) -> Result<()>;
    fn list(&self) -> Result<Vec<Order>>;
}

/// The one store handle shared across handlers and in-flight order workflows.
/// The mutex serializes all access, which is sufficient at the expected
/// request rate and closes the duplicate-create race on a single order id.
pub type SharedOrderStore = Arc<Mutex<dyn OrderStore>>;

pub struct SqliteOrderStore {
    conn: Connection,
}

impl SqliteOrderStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create order store dir {}", dir.display()))?;
        }

        let conn =
            Connection::open(&path).with_context(|| format!("open sqlite {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set sqlite busy_timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .context("configure sqlite pragmas")?;

        migrate(&conn).context("migrate sqlite schema")?;

        Ok(Self { conn })
    }
}

impl OrderStore for SqliteOrderStore {
    fn get(&self, order_id: &str) -> Result<Option<Order>> {
        let record: Option<String> = self
            .conn
            .query_row(
                "SELECT record FROM orders WHERE order_id = ?1",
                params![order_id],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("get order {order_id}"))?;

        record
            .map(|record| {
                serde_json::from_str(&record)
                    .with_context(|| format!("decode order record {order_id}"))
            })
            .transpose()
    }

    fn put(&mut self, order: &Order) -> Result<()> {
        let record = serde_json::to_string(order).context("encode order record")?;
        self.conn
            .execute(
                r#"
INSERT INTO orders (order_id, order_state, record) VALUES (?1, ?2, ?3)
ON CONFLICT(order_id) DO UPDATE SET order_state = excluded.order_state, record = excluded.record
"#,
                params![&order.order_id, state_to_str(order.order_state), &record],
            )
            .with_context(|| format!("put order {}", order.order_id))?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<Order>> {
        let mut stmt = self
            .conn
            .prepare("SELECT record FROM orders ORDER BY order_id")
            .context("prepare list orders")?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("query list orders")?;

        let mut out = Vec::new();
        for row in rows {
            let record = row.context("read order row")?;
            out.push(serde_json::from_str(&record).context("decode order record")?);
        }
        Ok(out)
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS orders (
  order_id TEXT PRIMARY KEY,
  order_state TEXT NOT NULL,
  record TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS orders_state_idx ON orders(order_state);
"#,
    )
    .context("create tables")?;
    Ok(())
}

fn state_to_str(state: OrderState) -> &'static str {
    match state {
        OrderState::Created => "created",
        OrderState::Completed => "completed",
        OrderState::Failed => "failed",
    }
}

/// In-memory store, used by tests and sufficient for short-lived quotes.
#[derive(Default)]
pub struct MemoryOrderStore {
    orders: HashMap<String, Order>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrderStore for MemoryOrderStore {
    fn get(&self, order_id: &str) -> Result<Option<Order>> {
        Ok(self.orders.get(order_id).cloned())
    }

    fn put(&mut self, order: &Order) -> Result<()> {
        self.orders.insert(order.order_id.clone(), order.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self.orders.values().cloned().collect();
        orders.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        Ok(orders)
    }
}

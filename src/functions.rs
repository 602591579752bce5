//! Domain functions the completion model may call.
//!
//! Each [`DomainFunction`] is a named, schema-described read against the
//! transactional tables (`products`, `orders`, `order_items`,
//! `promotions`). Functions never touch the vector store.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               FunctionCatalog                │
//! │  getProductExpiry        getProductInfo      │
//! │  getProductsExpiringSoon getActivePromotions │
//! │  getMonthlyRevenue       getRevenueByDateRange│
//! │  getBestSellingProduct                       │
//! └──────────────────────┬───────────────────────┘
//!                        ▼
//!     FunctionExecutor::execute(name, args) → FunctionOutcome
//! ```
//!
//! Functions flagged [`time_variant`](DomainFunction::time_variant) answer
//! questions whose answer changes day to day. When document context is
//! present only those are offered, since anything else could be answered
//! from the documents.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDate};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use crate::error::{Result, SupportError};

// ═══════════════════════════════════════════════════════════════════════
// Function Trait
// ═══════════════════════════════════════════════════════════════════════

/// Result of a successful function call.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionOutput {
    /// JSON payload handed back to the model.
    pub result: Value,
    /// One-line natural-language summary of `result`.
    pub summary: String,
}

/// A domain query the model can request by name.
#[async_trait]
pub trait DomainFunction: Send + Sync {
    /// camelCase identifier used in the function-calling envelope.
    fn name(&self) -> &str;

    /// Guides the model's decision to call this function.
    fn description(&self) -> &str;

    /// JSON Schema for the arguments object.
    fn parameters_schema(&self) -> Value;

    /// Whether the answer depends on the current date or live data that
    /// documents cannot hold.
    fn time_variant(&self) -> bool {
        false
    }

    async fn execute(&self, params: Value, ctx: &FunctionContext) -> Result<FunctionOutput>;
}

/// What a function sees while executing.
#[derive(Clone)]
pub struct FunctionContext {
    pool: SqlitePool,
    today: Option<NaiveDate>,
}

impl FunctionContext {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, today: None }
    }

    /// Pin "today" to a fixed date.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }
}

/// Serializable catalog entry, as offered to the model.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FunctionDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

// ═══════════════════════════════════════════════════════════════════════
// Catalog
// ═══════════════════════════════════════════════════════════════════════

/// Ordered set of callable functions.
pub struct FunctionCatalog {
    functions: Vec<Box<dyn DomainFunction>>,
}

impl FunctionCatalog {
    pub fn new() -> Self {
        Self {
            functions: Vec::new(),
        }
    }

    /// Catalog holding every grocery function.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register(Box::new(ProductExpiry));
        catalog.register(Box::new(ProductsExpiringSoon));
        catalog.register(Box::new(MonthlyRevenue));
        catalog.register(Box::new(RevenueByDateRange));
        catalog.register(Box::new(BestSellingProduct));
        catalog.register(Box::new(ActivePromotions));
        catalog.register(Box::new(ProductInfo));
        catalog
    }

    /// Register a function. A later registration with the same name
    /// replaces the earlier one.
    pub fn register(&mut self, function: Box<dyn DomainFunction>) {
        self.functions.retain(|f| f.name() != function.name());
        self.functions.push(function);
    }

    pub fn find(&self, name: &str) -> Option<&dyn DomainFunction> {
        self.functions
            .iter()
            .find(|f| f.name() == name)
            .map(|f| f.as_ref())
    }

    /// Descriptors for every function, or only time-variant ones when
    /// `restricted`.
    pub fn descriptors(&self, restricted: bool) -> Vec<FunctionDescriptor> {
        self.functions
            .iter()
            .filter(|f| !restricted || f.time_variant())
            .map(|f| FunctionDescriptor {
                name: f.name().to_string(),
                description: f.description().to_string(),
                parameters: f.parameters_schema(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl Default for FunctionCatalog {
    fn default() -> Self {
        Self::with_builtins()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Executor
// ═══════════════════════════════════════════════════════════════════════

/// Outcome of one function request. Failures are data, never panics or
/// propagated errors.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionOutcome {
    Success { result: Value, summary: String },
    Failure { error: String },
}

impl FunctionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FunctionOutcome::Success { .. })
    }

    /// The payload placed in the function-result message.
    pub fn to_json(&self) -> Value {
        match self {
            FunctionOutcome::Success { result, summary } => {
                json!({ "result": result, "summary": summary })
            }
            FunctionOutcome::Failure { error } => json!({ "error": error }),
        }
    }
}

pub struct FunctionExecutor {
    catalog: Arc<FunctionCatalog>,
    ctx: FunctionContext,
    timeout: Duration,
}

impl FunctionExecutor {
    pub fn new(catalog: Arc<FunctionCatalog>, ctx: FunctionContext, timeout: Duration) -> Self {
        Self {
            catalog,
            ctx,
            timeout,
        }
    }

    pub fn catalog(&self) -> &FunctionCatalog {
        &self.catalog
    }

    /// Run `name` with JSON-encoded `arguments`.
    ///
    /// When `allowed` is given, a name outside it is rejected before
    /// execution, exactly like an unknown name.
    pub async fn execute(
        &self,
        name: &str,
        arguments: &str,
        allowed: Option<&[String]>,
    ) -> FunctionOutcome {
        match self.try_execute(name, arguments, allowed).await {
            Ok(output) => {
                info!(function = name, summary = %output.summary, "function executed");
                FunctionOutcome::Success {
                    result: output.result,
                    summary: output.summary,
                }
            }
            Err(e) => {
                warn!(function = name, error = %e, "function call failed");
                FunctionOutcome::Failure {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn try_execute(
        &self,
        name: &str,
        arguments: &str,
        allowed: Option<&[String]>,
    ) -> Result<FunctionOutput> {
        if let Some(allowed) = allowed {
            if !allowed.iter().any(|a| a == name) {
                return Err(SupportError::FunctionUnknown(name.to_string()));
            }
        }
        let function = self
            .catalog
            .find(name)
            .ok_or_else(|| SupportError::FunctionUnknown(name.to_string()))?;

        let params = parse_arguments(arguments).map_err(|message| {
            SupportError::FunctionExecutionFailure {
                name: name.to_string(),
                message,
            }
        })?;

        match tokio::time::timeout(self.timeout, function.execute(params, &self.ctx)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(SupportError::FunctionExecutionFailure { name, message })) => {
                Err(SupportError::FunctionExecutionFailure { name, message })
            }
            Ok(Err(e)) => Err(SupportError::FunctionExecutionFailure {
                name: name.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(SupportError::FunctionExecutionFailure {
                name: name.to_string(),
                message: format!("timed out after {}s", self.timeout.as_secs()),
            }),
        }
    }
}

/// Parse the model's argument string. Blank means no arguments.
fn parse_arguments(arguments: &str) -> std::result::Result<Value, String> {
    if arguments.trim().is_empty() {
        return Ok(json!({}));
    }
    match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(map)) => Ok(Value::Object(map)),
        Ok(Value::Null) => Ok(json!({})),
        Ok(other) => Err(format!("arguments must be a JSON object, got {}", other)),
        Err(e) => Err(format!("arguments are not valid JSON: {}", e)),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Shared helpers
// ═══════════════════════════════════════════════════════════════════════

fn failure(name: &str, message: impl Into<String>) -> SupportError {
    SupportError::FunctionExecutionFailure {
        name: name.to_string(),
        message: message.into(),
    }
}

/// Accepts `YYYY-MM-DD`, or a timestamp beginning with one.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let head = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

fn date_param(name: &str, params: &Value, key: &str) -> Result<Option<NaiveDate>> {
    match params.get(key).and_then(|v| v.as_str()) {
        None => Ok(None),
        Some(s) => parse_date(s)
            .map(Some)
            .ok_or_else(|| failure(name, format!("{} must be YYYY-MM-DD, got '{}'", key, s))),
    }
}

/// Integer parameter, also accepting numeric strings.
fn int_param(params: &Value, key: &str) -> Option<i64> {
    match params.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct ProductRow {
    id: i64,
    name: String,
    category: Option<String>,
    description: Option<String>,
    price: f64,
    stock: i64,
    unit: Option<String>,
    expiry_date: Option<String>,
    image_url: Option<String>,
}

const PRODUCT_COLUMNS: &str =
    "id, name, category, description, price, stock, unit, expiry_date, image_url";

fn row_to_product(row: &sqlx::sqlite::SqliteRow) -> ProductRow {
    ProductRow {
        id: row.get("id"),
        name: row.get("name"),
        category: row.get("category"),
        description: row.get("description"),
        price: row.get("price"),
        stock: row.get("stock"),
        unit: row.get("unit"),
        expiry_date: row.get("expiry_date"),
        image_url: row.get("image_url"),
    }
}

/// Product reference from `product`, `productName` or `productId`.
fn product_query(params: &Value) -> Option<String> {
    for key in ["product", "productName", "productId", "name", "id"] {
        match params.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.trim().to_string()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

/// Resolve a product by id or fuzzy name.
///
/// Tries, in order: numeric id, case-insensitive substring match (exact
/// name first, then shortest), then best word overlap across all names.
async fn find_product(pool: &SqlitePool, query: &str) -> Result<Option<ProductRow>> {
    if let Ok(id) = query.parse::<i64>() {
        let row = sqlx::query(&format!("SELECT {} FROM products WHERE id = ?", PRODUCT_COLUMNS))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        if let Some(row) = row {
            return Ok(Some(row_to_product(&row)));
        }
    }

    let needle = query.to_lowercase();
    let row = sqlx::query(&format!(
        "SELECT {} FROM products WHERE lower(name) LIKE ? \
         ORDER BY (lower(name) = ?) DESC, length(name) ASC, id ASC LIMIT 1",
        PRODUCT_COLUMNS
    ))
    .bind(format!("%{}%", needle))
    .bind(&needle)
    .fetch_optional(pool)
    .await?;
    if let Some(row) = row {
        return Ok(Some(row_to_product(&row)));
    }

    let words: Vec<&str> = needle
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .collect();
    if words.is_empty() {
        return Ok(None);
    }
    let rows = sqlx::query(&format!("SELECT {} FROM products ORDER BY id", PRODUCT_COLUMNS))
        .fetch_all(pool)
        .await?;
    let best = rows
        .iter()
        .map(row_to_product)
        .map(|p| {
            let name = p.name.to_lowercase();
            let score = words.iter().filter(|w| name.contains(*w)).count();
            (score, p)
        })
        .filter(|(score, _)| *score > 0)
        .fold(None::<(usize, ProductRow)>, |best, (score, p)| match best {
            Some((b, _)) if b >= score => best,
            _ => Some((score, p)),
        });
    Ok(best.map(|(_, p)| p))
}

fn days_until(expiry: &str, today: NaiveDate) -> Option<i64> {
    parse_date(expiry).map(|d| (d - today).num_days())
}

struct RevenueTotals {
    revenue: f64,
    orders: i64,
}

async fn revenue_between(pool: &SqlitePool, start: NaiveDate, end: NaiveDate) -> Result<RevenueTotals> {
    let row = sqlx::query(
        r#"
        SELECT CAST(COALESCE(SUM(total), 0) AS REAL) AS revenue, COUNT(*) AS orders
        FROM orders
        WHERE lower(status) != 'cancelled'
          AND date(created_at) >= date(?)
          AND date(created_at) <= date(?)
        "#,
    )
    .bind(start.to_string())
    .bind(end.to_string())
    .fetch_one(pool)
    .await?;
    Ok(RevenueTotals {
        revenue: row.get("revenue"),
        orders: row.get("orders"),
    })
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in Functions
// ═══════════════════════════════════════════════════════════════════════

/// Days until one product expires.
pub struct ProductExpiry;

#[async_trait]
impl DomainFunction for ProductExpiry {
    fn name(&self) -> &str {
        "getProductExpiry"
    }

    fn description(&self) -> &str {
        "Look up a product's expiry date and how many days remain until it expires. \
         Accepts a product name (partial names are fine) or numeric id."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "product": { "type": "string", "description": "Product name or id" }
            },
            "required": ["product"]
        })
    }

    async fn execute(&self, params: Value, ctx: &FunctionContext) -> Result<FunctionOutput> {
        let query = product_query(&params)
            .ok_or_else(|| failure(self.name(), "product must not be empty"))?;
        let product = find_product(ctx.pool(), &query)
            .await?
            .ok_or_else(|| failure(self.name(), format!("no product matches '{}'", query)))?;

        let today = ctx.today();
        let days = product.expiry_date.as_deref().and_then(|e| days_until(e, today));
        let summary = match (&product.expiry_date, days) {
            (Some(date), Some(d)) if d < 0 => {
                format!("{} expired on {} ({} days ago).", product.name, date, -d)
            }
            (Some(date), Some(0)) => format!("{} expires today ({}).", product.name, date),
            (Some(date), Some(d)) => format!("{} expires on {}, in {} days.", product.name, date, d),
            _ => format!("{} has no recorded expiry date.", product.name),
        };

        Ok(FunctionOutput {
            result: json!({
                "productId": product.id,
                "name": product.name,
                "expiryDate": product.expiry_date,
                "daysUntilExpiry": days,
                "expired": days.map(|d| d < 0),
            }),
            summary,
        })
    }
}

/// Products whose expiry date falls within the next N days.
pub struct ProductsExpiringSoon;

#[async_trait]
impl DomainFunction for ProductsExpiringSoon {
    fn name(&self) -> &str {
        "getProductsExpiringSoon"
    }

    fn description(&self) -> &str {
        "List products that expire within the next N days (default 7), soonest first."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "days": { "type": "integer", "description": "Look-ahead window in days", "default": 7 }
            }
        })
    }

    fn time_variant(&self) -> bool {
        true
    }

    async fn execute(&self, params: Value, ctx: &FunctionContext) -> Result<FunctionOutput> {
        let days = int_param(&params, "days").unwrap_or(7);
        if !(0..=365).contains(&days) {
            return Err(failure(self.name(), "days must be between 0 and 365"));
        }
        let today = ctx.today();
        let until = today + chrono::Duration::days(days);

        let rows = sqlx::query(&format!(
            "SELECT {} FROM products \
             WHERE expiry_date IS NOT NULL \
               AND date(expiry_date) >= date(?) AND date(expiry_date) <= date(?) \
             ORDER BY date(expiry_date) ASC, name ASC",
            PRODUCT_COLUMNS
        ))
        .bind(today.to_string())
        .bind(until.to_string())
        .fetch_all(ctx.pool())
        .await?;

        let products: Vec<Value> = rows
            .iter()
            .map(row_to_product)
            .map(|p| {
                let d = p.expiry_date.as_deref().and_then(|e| days_until(e, today));
                json!({
                    "productId": p.id,
                    "name": p.name,
                    "expiryDate": p.expiry_date,
                    "daysUntilExpiry": d,
                    "stock": p.stock,
                })
            })
            .collect();

        let summary = if products.is_empty() {
            format!("No products expire within the next {} days.", days)
        } else {
            let names: Vec<&str> = products
                .iter()
                .filter_map(|p| p["name"].as_str())
                .collect();
            format!(
                "{} product(s) expire within {} days: {}.",
                products.len(),
                days,
                names.join(", ")
            )
        };

        Ok(FunctionOutput {
            result: json!({ "days": days, "count": products.len(), "products": products }),
            summary,
        })
    }
}

/// Revenue for one calendar month.
pub struct MonthlyRevenue;

#[async_trait]
impl DomainFunction for MonthlyRevenue {
    fn name(&self) -> &str {
        "getMonthlyRevenue"
    }

    fn description(&self) -> &str {
        "Total revenue and order count for a calendar month. Defaults to the current month."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "year": { "type": "integer", "description": "Four-digit year" },
                "month": { "type": "integer", "description": "Month number, 1-12" }
            }
        })
    }

    fn time_variant(&self) -> bool {
        true
    }

    async fn execute(&self, params: Value, ctx: &FunctionContext) -> Result<FunctionOutput> {
        let today = ctx.today();
        let year = int_param(&params, "year").unwrap_or(today.year() as i64);
        let month = int_param(&params, "month").unwrap_or(today.month() as i64);
        if !(1..=12).contains(&month) {
            return Err(failure(self.name(), "month must be between 1 and 12"));
        }

        let start = NaiveDate::from_ymd_opt(year as i32, month as u32, 1)
            .ok_or_else(|| failure(self.name(), format!("invalid year {}", year)))?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year as i32 + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year as i32, month as u32 + 1, 1)
        };
        let end = next
            .and_then(|d| d.pred_opt())
            .ok_or_else(|| failure(self.name(), format!("invalid year {}", year)))?;

        let totals = revenue_between(ctx.pool(), start, end).await?;
        let revenue = round2(totals.revenue);
        Ok(FunctionOutput {
            result: json!({
                "year": year,
                "month": month,
                "revenue": revenue,
                "orderCount": totals.orders,
            }),
            summary: format!(
                "Revenue for {}-{:02}: {:.2} from {} orders.",
                year, month, revenue, totals.orders
            ),
        })
    }
}

/// Revenue between two dates, inclusive.
pub struct RevenueByDateRange;

#[async_trait]
impl DomainFunction for RevenueByDateRange {
    fn name(&self) -> &str {
        "getRevenueByDateRange"
    }

    fn description(&self) -> &str {
        "Total revenue and order count between two dates (inclusive, YYYY-MM-DD)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "startDate": { "type": "string", "description": "First day, YYYY-MM-DD" },
                "endDate": { "type": "string", "description": "Last day, YYYY-MM-DD" }
            },
            "required": ["startDate", "endDate"]
        })
    }

    fn time_variant(&self) -> bool {
        true
    }

    async fn execute(&self, params: Value, ctx: &FunctionContext) -> Result<FunctionOutput> {
        let start = date_param(self.name(), &params, "startDate")?
            .ok_or_else(|| failure(self.name(), "startDate is required"))?;
        let end = date_param(self.name(), &params, "endDate")?.unwrap_or_else(|| ctx.today());
        if end < start {
            return Err(failure(self.name(), "endDate is before startDate"));
        }

        let totals = revenue_between(ctx.pool(), start, end).await?;
        let revenue = round2(totals.revenue);
        Ok(FunctionOutput {
            result: json!({
                "startDate": start.to_string(),
                "endDate": end.to_string(),
                "revenue": revenue,
                "orderCount": totals.orders,
            }),
            summary: format!(
                "Revenue from {} to {}: {:.2} from {} orders.",
                start, end, revenue, totals.orders
            ),
        })
    }
}

/// Product with the most units sold, with its image.
pub struct BestSellingProduct;

#[async_trait]
impl DomainFunction for BestSellingProduct {
    fn name(&self) -> &str {
        "getBestSellingProduct"
    }

    fn description(&self) -> &str {
        "Find the best-selling product by units sold, optionally within a date range. \
         Includes the product image URL."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "startDate": { "type": "string", "description": "Optional first day, YYYY-MM-DD" },
                "endDate": { "type": "string", "description": "Optional last day, YYYY-MM-DD" }
            }
        })
    }

    fn time_variant(&self) -> bool {
        true
    }

    async fn execute(&self, params: Value, ctx: &FunctionContext) -> Result<FunctionOutput> {
        let start = date_param(self.name(), &params, "startDate")?;
        let end = date_param(self.name(), &params, "endDate")?;

        let row = sqlx::query(
            r#"
            SELECT p.id AS id, p.name AS name, p.image_url AS image_url, p.price AS price,
                   CAST(SUM(oi.quantity) AS INTEGER) AS units,
                   CAST(SUM(oi.quantity * oi.unit_price) AS REAL) AS revenue
            FROM order_items oi
            JOIN orders o ON o.id = oi.order_id
            JOIN products p ON p.id = oi.product_id
            WHERE lower(o.status) != 'cancelled'
              AND date(o.created_at) >= date(?)
              AND date(o.created_at) <= date(?)
            GROUP BY p.id
            ORDER BY units DESC, revenue DESC, p.id ASC
            LIMIT 1
            "#,
        )
        .bind(start.map(|d| d.to_string()).unwrap_or_else(|| "0001-01-01".into()))
        .bind(end.map(|d| d.to_string()).unwrap_or_else(|| "9999-12-31".into()))
        .fetch_optional(ctx.pool())
        .await?;

        let Some(row) = row else {
            return Ok(FunctionOutput {
                result: json!({ "product": null }),
                summary: "No sales recorded for that period.".to_string(),
            });
        };

        let name: String = row.get("name");
        let units: i64 = row.get("units");
        let image_url: Option<String> = row.get("image_url");
        Ok(FunctionOutput {
            result: json!({
                "product": {
                    "productId": row.get::<i64, _>("id"),
                    "name": name,
                    "price": row.get::<f64, _>("price"),
                    "imageUrl": image_url,
                    "unitsSold": units,
                    "revenue": round2(row.get::<f64, _>("revenue")),
                }
            }),
            summary: format!("{} is the best seller with {} units sold.", name, units),
        })
    }
}

/// Promotions running today.
pub struct ActivePromotions;

#[async_trait]
impl DomainFunction for ActivePromotions {
    fn name(&self) -> &str {
        "getActivePromotions"
    }

    fn description(&self) -> &str {
        "List promotions and discounts that are active today."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn time_variant(&self) -> bool {
        true
    }

    async fn execute(&self, _params: Value, ctx: &FunctionContext) -> Result<FunctionOutput> {
        let today = ctx.today().to_string();
        let rows = sqlx::query(
            r#"
            SELECT id, title, description, discount_percent, starts_at, ends_at
            FROM promotions
            WHERE date(starts_at) <= date(?) AND date(ends_at) >= date(?)
            ORDER BY discount_percent DESC, id ASC
            "#,
        )
        .bind(&today)
        .bind(&today)
        .fetch_all(ctx.pool())
        .await?;

        let promotions: Vec<Value> = rows
            .iter()
            .map(|r| {
                json!({
                    "id": r.get::<i64, _>("id"),
                    "title": r.get::<String, _>("title"),
                    "description": r.get::<Option<String>, _>("description"),
                    "discountPercent": r.get::<f64, _>("discount_percent"),
                    "startsAt": r.get::<String, _>("starts_at"),
                    "endsAt": r.get::<String, _>("ends_at"),
                })
            })
            .collect();

        let summary = if promotions.is_empty() {
            "There are no active promotions today.".to_string()
        } else {
            let titles: Vec<&str> = promotions
                .iter()
                .filter_map(|p| p["title"].as_str())
                .collect();
            format!("{} active promotion(s): {}.", promotions.len(), titles.join(", "))
        };

        Ok(FunctionOutput {
            result: json!({ "count": promotions.len(), "promotions": promotions }),
            summary,
        })
    }
}

/// Catalog facts for one product.
pub struct ProductInfo;

#[async_trait]
impl DomainFunction for ProductInfo {
    fn name(&self) -> &str {
        "getProductInfo"
    }

    fn description(&self) -> &str {
        "Look up a product's price, stock, unit, category and description by name or id."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "product": { "type": "string", "description": "Product name or id" }
            },
            "required": ["product"]
        })
    }

    async fn execute(&self, params: Value, ctx: &FunctionContext) -> Result<FunctionOutput> {
        let query = product_query(&params)
            .ok_or_else(|| failure(self.name(), "product must not be empty"))?;
        let p = find_product(ctx.pool(), &query)
            .await?
            .ok_or_else(|| failure(self.name(), format!("no product matches '{}'", query)))?;

        let unit = p.unit.clone().unwrap_or_else(|| "item".to_string());
        let availability = if p.stock > 0 {
            format!("{} in stock", p.stock)
        } else {
            "out of stock".to_string()
        };
        Ok(FunctionOutput {
            summary: format!("{} costs {:.2} per {}, {}.", p.name, p.price, unit, availability),
            result: json!({
                "productId": p.id,
                "name": p.name,
                "category": p.category,
                "description": p.description,
                "price": p.price,
                "stock": p.stock,
                "unit": p.unit,
                "expiryDate": p.expiry_date,
                "imageUrl": p.image_url,
            }),
        })
    }
}

//! Customer and ticket datastore.
//!
//! The orchestration core treats the datastore as an external collaborator and
//! only talks to it through [`Datastore`]. [`MemoryStore`] is the bundled
//! implementation: it serializes every write behind one lock, so generated
//! ticket ids are unique and strictly increasing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// Customer fields that `update_customer` may change.
pub const UPDATABLE_CUSTOMER_FIELDS: [&str; 4] = ["name", "email", "phone", "status"];

/// A customer record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    /// Customer ID.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Contact email.
    pub email: Option<String>,
    /// Contact phone.
    pub phone: Option<String>,
    /// Account status (`active`, `disabled`, ...).
    pub status: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// A support ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket ID.
    pub id: i64,
    /// Owning customer.
    pub customer_id: i64,
    /// Issue description.
    pub issue: String,
    /// Lifecycle status.
    pub status: String,
    /// Priority label.
    pub priority: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// Audit record of a customer update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerUpdate {
    /// Updated customer.
    pub customer_id: i64,
    /// Fields that were written.
    pub fields: Map<String, Value>,
    /// When the update was applied.
    pub at: DateTime<Utc>,
}

/// Input for a new ticket.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub customer_id: i64,
    pub issue: String,
    pub priority: String,
}

/// Partial ticket update.
#[derive(Debug, Clone, Default)]
pub struct TicketPatch {
    pub status: Option<String>,
    pub priority: Option<String>,
}

/// Everything known about one customer's past interactions.
#[derive(Debug, Clone, Serialize)]
pub struct CustomerHistory {
    /// Customer the history belongs to.
    pub customer_id: i64,
    /// Tickets, newest first.
    pub tickets: Vec<Ticket>,
    /// Profile updates, newest first.
    pub updates: Vec<CustomerUpdate>,
}

/// Datastore collaborator used by tool handlers and the support agent.
#[async_trait::async_trait]
pub trait Datastore: Send + Sync {
    /// Fetch a customer by id.
    async fn get_customer(&self, id: i64) -> Result<Option<Customer>>;

    /// List customers, optionally filtered by status.
    async fn list_customers(&self, status: Option<&str>, limit: usize) -> Result<Vec<Customer>>;

    /// Apply a field patch. Returns the updated record, or `None` if absent.
    async fn update_customer(&self, id: i64, fields: &Map<String, Value>)
        -> Result<Option<Customer>>;

    /// Insert a ticket and return it with its generated id.
    async fn insert_ticket(&self, ticket: NewTicket) -> Result<Ticket>;

    /// Update ticket status and/or priority.
    async fn update_ticket(&self, id: i64, patch: TicketPatch) -> Result<Option<Ticket>>;

    /// Tickets and profile updates for a customer.
    async fn customer_history(&self, id: i64) -> Result<CustomerHistory>;
}

#[derive(Debug, Default)]
struct StoreState {
    customers: BTreeMap<i64, Customer>,
    tickets: BTreeMap<i64, Ticket>,
    updates: Vec<CustomerUpdate>,
    next_ticket_id: i64,
}

/// In-memory [`Datastore`].
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState {
                next_ticket_id: 1,
                ..Default::default()
            }),
        }
    }

    /// Create a store holding the demo customers and tickets.
    pub fn seeded() -> Self {
        let now = Utc::now();
        let customers = [
            (1, "John Doe", "john.doe@example.com", "+1-555-0101", "active"),
            (2, "Jane Smith", "jane.smith@example.com", "+1-555-0102", "active"),
            (3, "Bob Johnson", "bob.johnson@example.com", "+1-555-0103", "disabled"),
            (4, "Alice Williams", "alice.w@techcorp.com", "+1-555-0104", "active"),
            (5, "Charlie Brown", "charlie.brown@email.com", "+1-555-0105", "active"),
            (6, "Diana Prince", "diana.prince@example.com", "+1-555-0106", "disabled"),
            (7, "Edward Norton", "ed.norton@example.com", "+1-555-0107", "active"),
            (8, "Fiona Green", "fiona.green@example.com", "+1-555-0108", "active"),
        ];
        let tickets = [
            (1, "Cannot login to account", "open", "high"),
            (4, "Database connection timeout errors", "in_progress", "high"),
            (4, "Payment processing failing for all transactions", "open", "high"),
            (2, "Feature request: dark mode", "resolved", "low"),
            (5, "Invoice shows wrong billing address", "open", "medium"),
            (7, "Password reset email not arriving", "closed", "medium"),
            (8, "Mobile app crashes on startup", "open", "medium"),
        ];

        let mut state = StoreState {
            next_ticket_id: 1,
            ..Default::default()
        };
        for (id, name, email, phone, status) in customers {
            state.customers.insert(
                id,
                Customer {
                    id,
                    name: name.into(),
                    email: Some(email.into()),
                    phone: Some(phone.into()),
                    status: status.into(),
                    created_at: now,
                    updated_at: now,
                },
            );
        }
        for (customer_id, issue, status, priority) in tickets {
            let id = state.next_ticket_id;
            state.next_ticket_id += 1;
            state.tickets.insert(
                id,
                Ticket {
                    id,
                    customer_id,
                    issue: issue.into(),
                    status: status.into(),
                    priority: priority.into(),
                    created_at: now,
                    updated_at: now,
                },
            );
        }

        Self {
            state: Mutex::new(state),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Check a customer patch without applying it.
pub fn validate_customer_patch(fields: &Map<String, Value>) -> Result<()> {
    if fields.is_empty() {
        return Err(Error::validation("data", "no fields to update"));
    }
    for (key, value) in fields {
        if !UPDATABLE_CUSTOMER_FIELDS.contains(&key.as_str()) {
            return Err(Error::validation(
                format!("data.{key}"),
                format!(
                    "not an updatable field (allowed: {})",
                    UPDATABLE_CUSTOMER_FIELDS.join(", ")
                ),
            ));
        }
        if !value.is_string() {
            return Err(Error::validation(format!("data.{key}"), "expected string"));
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl Datastore for MemoryStore {
    async fn get_customer(&self, id: i64) -> Result<Option<Customer>> {
        let state = self.state.lock().await;
        Ok(state.customers.get(&id).cloned())
    }

    async fn list_customers(&self, status: Option<&str>, limit: usize) -> Result<Vec<Customer>> {
        let state = self.state.lock().await;
        Ok(state
            .customers
            .values()
            .filter(|c| status.map_or(true, |s| c.status.eq_ignore_ascii_case(s)))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_customer(
        &self,
        id: i64,
        fields: &Map<String, Value>,
    ) -> Result<Option<Customer>> {
        validate_customer_patch(fields)?;

        let mut state = self.state.lock().await;
        let now = Utc::now();
        let Some(customer) = state.customers.get_mut(&id) else {
            return Ok(None);
        };

        for (key, value) in fields {
            let value = value.as_str().map(str::to_string);
            match key.as_str() {
                "name" => customer.name = value.unwrap_or_default(),
                "email" => customer.email = value,
                "phone" => customer.phone = value,
                "status" => customer.status = value.unwrap_or_default(),
                _ => {}
            }
        }
        customer.updated_at = now;
        let updated = customer.clone();

        state.updates.push(CustomerUpdate {
            customer_id: id,
            fields: fields.clone(),
            at: now,
        });

        Ok(Some(updated))
    }

    async fn insert_ticket(&self, ticket: NewTicket) -> Result<Ticket> {
        let mut state = self.state.lock().await;
        if !state.customers.contains_key(&ticket.customer_id) {
            return Err(Error::NotFound(format!("customer {}", ticket.customer_id)));
        }

        let id = state.next_ticket_id;
        state.next_ticket_id += 1;
        let now = Utc::now();
        let ticket = Ticket {
            id,
            customer_id: ticket.customer_id,
            issue: ticket.issue,
            status: "open".into(),
            priority: ticket.priority,
            created_at: now,
            updated_at: now,
        };
        state.tickets.insert(id, ticket.clone());
        Ok(ticket)
    }

    async fn update_ticket(&self, id: i64, patch: TicketPatch) -> Result<Option<Ticket>> {
        let mut state = self.state.lock().await;
        let Some(ticket) = state.tickets.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(status) = patch.status {
            ticket.status = status;
        }
        if let Some(priority) = patch.priority {
            ticket.priority = priority;
        }
        ticket.updated_at = Utc::now();
        Ok(Some(ticket.clone()))
    }

    async fn customer_history(&self, id: i64) -> Result<CustomerHistory> {
        let state = self.state.lock().await;
        // Ids grow with insertion time, so reverse id order is newest first.
        let tickets = state
            .tickets
            .values()
            .rev()
            .filter(|t| t.customer_id == id)
            .cloned()
            .collect();
        let updates = state
            .updates
            .iter()
            .rev()
            .filter(|u| u.customer_id == id)
            .cloned()
            .collect();
        Ok(CustomerHistory {
            customer_id: id,
            tickets,
            updates,
        })
    }
}

//! Command Executor
//!
//! Runs one parsed [`Command`] against the [`Store`] and appends the reply to
//! the connection's output buffer.
//!
//! Every store lookup goes through [`Store::find`], which returns an
//! [`ItemRef`](crate::storage::ItemRef) holding the item's bucket lock. The
//! lock is released when that handle goes out of scope, so each branch below
//! releases it exactly once however it exits.
//!
//! ## Replies
//!
//! | Command | Hit | Miss |
//! |---|---|---|
//! | `get`/`gets` | `VALUE` block per hit, then `END` | `NOT_FOUND` if every key missed |
//! | `delete` | `DELETED <key>` | nothing |
//! | `set` | `STORED` (in place) | `STORED` (insert) |
//! | `add` | `EXISTS` | `STORED` |
//! | `replace`/`append`/`prepend` | `STORED` | `NOT_FOUND` |
//! | `cas` | `STORED`, or `NOT_STORED` on a stale version | `NOT_FOUND` |
//!
//! A failed buffer allocation while mutating a value replies `ERROR`.

use crate::protocol::{Command, CommandKind, Response};
use crate::storage::{Expiry, Store};
use bytes::BytesMut;
use std::collections::TryReserveError;
use std::sync::Arc;
use tracing::{trace, warn};

/// Executes commands against a shared store.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    store: Arc<Store>,
}

impl CommandHandler {
    /// Creates a new command handler over the given store.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// The store this handler operates on.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Executes `cmd`, appending the reply to `out`.
    pub fn execute(&self, cmd: &Command<'_>, out: &mut BytesMut) {
        trace!(command = %cmd.kind, keys = cmd.keys.len(), "Executing command");

        match cmd.kind {
            kind if kind.is_retrieval() => self.retrieve(cmd, out),
            CommandKind::Delete => self.delete(cmd, out),
            _ => self.store_value(cmd).serialize_into(out),
        }
    }

    fn retrieve(&self, cmd: &Command<'_>, out: &mut BytesMut) {
        let with_cas = cmd.kind == CommandKind::Gets;
        let mut hits = 0;

        for key in cmd.keys {
            if let Some(item) = self.store.find(key, true) {
                Response::Value {
                    key: item.key(),
                    flags: item.flags,
                    data: item.value(),
                    cas: with_cas.then(|| item.version()),
                }
                .serialize_into(out);
                hits += 1;
            }
        }

        if hits > 0 {
            Response::End.serialize_into(out);
        } else {
            Response::NotFound.serialize_into(out);
        }
    }

    fn delete(&self, cmd: &Command<'_>, out: &mut BytesMut) {
        for key in cmd.keys {
            if let Some(item) = self.store.find(key, false) {
                item.remove();
                Response::Deleted(key).serialize_into(out);
            }
        }
    }

    fn store_value(&self, cmd: &Command<'_>) -> Response<'static> {
        let key = cmd.key();
        let expiry = Expiry::from_exptime(cmd.exptime);

        let mut item = match self.store.find(key, false) {
            Some(item) => item,
            None => {
                return match cmd.kind {
                    CommandKind::Set => {
                        self.store.insert(key, cmd.flags, expiry, cmd.payload);
                        Response::Stored
                    }
                    // Someone may have inserted since the lookup
                    CommandKind::Add => match self
                        .store
                        .insert_absent(key, cmd.flags, expiry, cmd.payload)
                    {
                        Some(_) => Response::Stored,
                        None => Response::Exists,
                    },
                    _ => Response::NotFound,
                };
            }
        };

        let result: Result<(), TryReserveError> = match cmd.kind {
            CommandKind::Add => return Response::Exists,
            CommandKind::Cas if item.version() != cmd.cas => return Response::NotStored,
            CommandKind::Set | CommandKind::Replace | CommandKind::Cas => {
                item.set_value(cmd.flags, expiry, cmd.payload)
            }
            CommandKind::Append => item.append(cmd.payload),
            CommandKind::Prepend => item.prepend(cmd.payload),
            // Key-list commands carry no value to store
            CommandKind::Get | CommandKind::Gets | CommandKind::Delete => return Response::Error,
        };

        match result {
            Ok(()) => Response::Stored,
            Err(e) => {
                warn!(
                    command = %cmd.kind,
                    size = cmd.payload.len(),
                    error = %e,
                    "Value allocation failed"
                );
                Response::Error
            }
        }
    }
}

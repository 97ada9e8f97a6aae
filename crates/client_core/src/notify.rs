use std::fmt;

use tokio::sync::broadcast;

/// What a batch of rows is called in user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Lines,
    Invoices,
    Requisitions,
}

impl Subject {
    pub fn noun(self, count: usize) -> &'static str {
        match (self, count) {
            (Subject::Lines, 1) => "line",
            (Subject::Lines, _) => "lines",
            (Subject::Invoices, 1) => "shipment",
            (Subject::Invoices, _) => "shipments",
            (Subject::Requisitions, 1) => "requisition",
            (Subject::Requisitions, _) => "requisitions",
        }
    }
}

/// One user-visible outcome of a mutation request. Each request yields
/// exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    SelectRowsFirst,
    Disabled,
    CannotDelete { subject: Subject, reason: String },
    Deleted { subject: Subject, count: usize },
    Saved { subject: Subject, count: usize },
    MutationFailed,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::SelectRowsFirst => write!(f, "Select rows first"),
            Notice::Disabled => write!(f, "This record can no longer be edited"),
            Notice::CannotDelete { subject, reason } => {
                write!(f, "Cannot delete the selected {}: {reason}", subject.noun(2))
            }
            Notice::Deleted { subject, count } => {
                write!(f, "Deleted {count} {}", subject.noun(*count))
            }
            Notice::Saved { subject, count } => write!(f, "Saved {count} {}", subject.noun(*count)),
            Notice::MutationFailed => write!(f, "Something went wrong; changes were not saved"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub severity: Severity,
    pub notice: Notice,
}

/// Sink for user-facing notices.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);

    fn info(&self, notice: Notice) {
        self.notify(Notification {
            severity: Severity::Info,
            notice,
        });
    }

    fn success(&self, notice: Notice) {
        self.notify(Notification {
            severity: Severity::Success,
            notice,
        });
    }

    fn error(&self, notice: Notice) {
        self.notify(Notification {
            severity: Severity::Error,
            notice,
        });
    }
}

/// Fans notices out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    events: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self { events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(32)
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, notification: Notification) {
        let _ = self.events.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices_read_naturally() {
        assert_eq!(
            Notice::Deleted {
                subject: Subject::Lines,
                count: 1
            }
            .to_string(),
            "Deleted 1 line"
        );
        assert_eq!(
            Notice::Saved {
                subject: Subject::Lines,
                count: 3
            }
            .to_string(),
            "Saved 3 lines"
        );
        assert_eq!(
            Notice::CannotDelete {
                subject: Subject::Invoices,
                reason: "only new shipments can be deleted".into()
            }
            .to_string(),
            "Cannot delete the selected shipments: only new shipments can be deleted"
        );
    }

    #[tokio::test]
    async fn broadcast_notifier_reaches_every_subscriber() {
        let notifier = BroadcastNotifier::default();
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        notifier.success(Notice::Deleted {
            subject: Subject::Requisitions,
            count: 2,
        });

        let expected = Notification {
            severity: Severity::Success,
            notice: Notice::Deleted {
                subject: Subject::Requisitions,
                count: 2,
            },
        };
        assert_eq!(first.recv().await.expect("first"), expected);
        assert_eq!(second.recv().await.expect("second"), expected);
    }
}

//! Change notifications
//!
//! State reads are pull-based query APIs; this channel exists only so that
//! interested consumers (dashboards, cache layers) can learn that something
//! changed and re-query. It carries no payload beyond the affected org.

use receiptly_shared::OrgId;
use tokio::sync::broadcast;

/// Notification that billing state changed for an organization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    UsageChanged(OrgId),
    SubscriptionChanged(OrgId),
}

/// Broadcast hub for [`ChangeEvent`]s.
///
/// Cheap to clone; all clones share one channel. Sends never block and a
/// send with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        // Slow subscribers drop oldest events; consumers re-query anyway.
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn usage_changed(&self, org_id: OrgId) {
        let _ = self.tx.send(ChangeEvent::UsageChanged(org_id));
    }

    pub fn subscription_changed(&self, org_id: OrgId) {
        let _ = self.tx.send(ChangeEvent::SubscriptionChanged(org_id));
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let notifier = ChangeNotifier::new();
        let mut rx = notifier.subscribe();
        let org = OrgId::new();

        notifier.usage_changed(org);
        notifier.subscription_changed(org);

        assert_eq!(rx.recv().await.unwrap(), ChangeEvent::UsageChanged(org));
        assert_eq!(
            rx.recv().await.unwrap(),
            ChangeEvent::SubscriptionChanged(org)
        );
    }

    #[test]
    fn test_send_without_subscribers_does_not_panic() {
        let notifier = ChangeNotifier::new();
        notifier.usage_changed(OrgId::new());
    }
}

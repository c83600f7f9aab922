use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Side effects of a completed turn, emitted at most once per turn.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Structured stage data extracted by the agent.
    AutoFill(serde_json::Value),
    /// The agent considers the current stage finished.
    StageComplete,
}

type AutoFillFn = Box<dyn Fn(serde_json::Value) + Send + Sync>;
type StageCompleteFn = Box<dyn Fn() + Send + Sync>;

/// Adapter that turns [`SessionEvent`]s into caller-supplied callbacks.
#[derive(Default)]
pub struct SessionCallbacks {
    on_auto_fill: Option<AutoFillFn>,
    on_stage_complete: Option<StageCompleteFn>,
}

impl SessionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_auto_fill<F>(mut self, callback: F) -> Self
    where
        F: Fn(serde_json::Value) + Send + Sync + 'static,
    {
        self.on_auto_fill = Some(Box::new(callback));
        self
    }

    pub fn on_stage_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_stage_complete = Some(Box::new(callback));
        self
    }

    pub fn dispatch(&self, event: SessionEvent) {
        match event {
            SessionEvent::AutoFill(data) => {
                if let Some(callback) = &self.on_auto_fill {
                    callback(data);
                }
            }
            SessionEvent::StageComplete => {
                if let Some(callback) = &self.on_stage_complete {
                    callback();
                }
            }
        }
    }

    /// Dispatch until the session and all its clones are dropped.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event);
        }
        log::debug!("Session event channel closed");
    }

    pub fn spawn(self, events: mpsc::UnboundedReceiver<SessionEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    #[tokio::test]
    async fn callbacks_receive_events_in_order() {
        let filled = Arc::new(Mutex::new(Vec::new()));
        let completed = Arc::new(AtomicUsize::new(0));

        let callbacks = {
            let filled = filled.clone();
            let completed = completed.clone();
            SessionCallbacks::new()
                .on_auto_fill(move |data| filled.lock().unwrap().push(data))
                .on_stage_complete(move || {
                    completed.fetch_add(1, Ordering::SeqCst);
                })
        };

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(SessionEvent::AutoFill(serde_json::json!({"title": "Todo"})))
            .unwrap();
        tx.send(SessionEvent::StageComplete).unwrap();
        drop(tx);

        callbacks.spawn(rx).await.unwrap();

        assert_eq!(
            *filled.lock().unwrap(),
            vec![serde_json::json!({"title": "Todo"})]
        );
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_callbacks_are_skipped() {
        SessionCallbacks::new().dispatch(SessionEvent::StageComplete);
    }
}

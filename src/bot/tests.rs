use super::*;
use crate::bus::memory::MemoryBus;
use crate::bus::Publisher;
use crate::event::ControlAction;
use crate::notify::telegram::tests::serve_once;
use anyhow::anyhow;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const TOPIC: &str = "pc.activity.control";

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Send { chat_id: i64, text: String, keyboard: bool },
    Answer(String),
    Edit { message_id: i64, text: String, keyboard: bool },
}

/// Bot API double: scripted `getUpdates` results, recorded outgoing calls.
#[derive(Clone, Default)]
struct FakeApi {
    updates: Arc<Mutex<VecDeque<Result<Vec<Update>>>>>,
    offsets: Arc<Mutex<Vec<i64>>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl FakeApi {
    fn scripted(batches: Vec<Result<Vec<Update>>>) -> Self {
        let api = Self::default();
        *api.updates.lock().unwrap() = batches.into();
        api
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BotApi for FakeApi {
    async fn get_updates(&self, offset: i64, _timeout_secs: u64) -> Result<Vec<Update>> {
        self.offsets.lock().unwrap().push(offset);
        let next = self.updates.lock().unwrap().pop_front();
        match next {
            Some(batch) => batch,
            None => {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn send_message(&self, chat_id: i64, html: &str, keyboard: Option<&Value>) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Send {
            chat_id,
            text: html.to_string(),
            keyboard: keyboard.is_some(),
        });
        Ok(())
    }

    async fn answer_callback_query(&self, callback_id: &str) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Answer(callback_id.to_string()));
        Ok(())
    }

    async fn edit_message_text(
        &self,
        _chat_id: i64,
        message_id: i64,
        html: &str,
        keyboard: Option<&Value>,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Edit {
            message_id,
            text: html.to_string(),
            keyboard: keyboard.is_some(),
        });
        Ok(())
    }
}

fn start(update_id: i64, user_id: i64) -> Update {
    serde_json::from_value(json!({
        "update_id": update_id,
        "message": {
            "message_id": 10,
            "chat": { "id": 500, "type": "private" },
            "from": { "id": user_id, "is_bot": false, "first_name": "Ops" },
            "text": "/start",
        }
    }))
    .unwrap()
}

fn press(update_id: i64, user_id: i64, data: &str) -> Update {
    serde_json::from_value(json!({
        "update_id": update_id,
        "callback_query": {
            "id": format!("cb-{}", update_id),
            "from": { "id": user_id, "is_bot": false, "first_name": "Ops" },
            "message": {
                "message_id": 11,
                "chat": { "id": 500, "type": "private" },
                "text": "Choose an action:",
            },
            "chat_instance": "1",
            "data": data,
        }
    }))
    .unwrap()
}

fn bot(api: &FakeApi, bus: &MemoryBus, allowed: &[&str]) -> ControlBot<FakeApi, MemoryBus> {
    let issuer = ControlIssuer::new(
        Publisher::new(bus.clone()),
        TOPIC,
        allowed.iter().map(|a| a.to_string()).collect(),
    );
    ControlBot::new(api.clone(), issuer, "[AdminPC]", "desk-01")
}

#[tokio::test]
async fn test_start_shows_keyboard_to_allowed_user() {
    let api = FakeApi::default();
    let bus = MemoryBus::new();

    let issued = bot(&api, &bus, &["telegram:42"]).handle(start(1, 42)).await.unwrap();

    assert!(issued.is_none());
    match &api.calls()[..] {
        [Call::Send { chat_id, text, keyboard }] => {
            assert_eq!(*chat_id, 500);
            assert!(text.starts_with("<b>[AdminPC]</b>"));
            assert!(*keyboard);
        }
        other => panic!("Expected one keyboard message, got {:?}", other),
    }
}

#[tokio::test]
async fn test_start_from_unlisted_user_is_refused() {
    let api = FakeApi::default();
    let bus = MemoryBus::new();

    bot(&api, &bus, &["telegram:42"]).handle(start(1, 7)).await.unwrap();

    assert_eq!(
        api.calls(),
        vec![Call::Send {
            chat_id: 500,
            text: NOT_AUTHORIZED.to_string(),
            keyboard: false,
        }]
    );
}

#[tokio::test]
async fn test_lock_press_publishes_and_reports_status() {
    let api = FakeApi::default();
    let bus = MemoryBus::new();

    let command = bot(&api, &bus, &[])
        .handle(press(2, 42, "lock"))
        .await
        .unwrap()
        .expect("lock should be issued");

    assert_eq!(command.action, ControlAction::Lock);
    assert_eq!(command.target.as_deref(), Some("desk-01"));
    assert_eq!(command.issued_by.as_deref(), Some("telegram:42"));

    let sent = bus.published(TOPIC);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].key, "desk-01");

    let calls = api.calls();
    assert_eq!(calls[0], Call::Answer("cb-2".to_string()));
    match &calls[1] {
        Call::Edit { message_id, text, keyboard } => {
            assert_eq!(*message_id, 11);
            assert!(text.contains("🔒 Lock sent"));
            assert!(text.contains("<code>desk-01</code>"));
            assert!(text.contains("🕑 "));
            assert!(*keyboard);
        }
        other => panic!("Expected an edit, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unlock_press_issues_unlock() {
    let api = FakeApi::default();
    let bus = MemoryBus::new();

    let command = bot(&api, &bus, &[]).handle(press(3, 42, "unlock")).await.unwrap().unwrap();

    assert_eq!(command.action, ControlAction::Unlock);
    assert!(matches!(&api.calls()[1], Call::Edit { text, .. } if text.contains("Unlock sent")));
}

#[tokio::test]
async fn test_noop_and_unknown_buttons_publish_nothing() {
    let api = FakeApi::default();
    let bus = MemoryBus::new();
    let bot = bot(&api, &bus, &[]);

    assert!(bot.handle(press(4, 42, "noop")).await.unwrap().is_none());
    assert!(bot.handle(press(5, 42, "reboot")).await.unwrap().is_none());

    assert!(bus.attempts().is_empty());
    assert_eq!(
        api.calls(),
        vec![
            Call::Answer("cb-4".to_string()),
            Call::Answer("cb-5".to_string()),
            Call::Edit {
                message_id: 11,
                text: UNKNOWN_ACTION.to_string(),
                keyboard: false,
            },
        ]
    );
}

#[tokio::test]
async fn test_press_from_unlisted_user_is_refused() {
    let api = FakeApi::default();
    let bus = MemoryBus::new();

    let issued = bot(&api, &bus, &["telegram:42"]).handle(press(6, 99, "lock")).await.unwrap();

    assert!(issued.is_none());
    assert!(bus.attempts().is_empty());
    assert!(matches!(&api.calls()[1], Call::Edit { text, .. } if text == NOT_AUTHORIZED));
}

#[tokio::test]
async fn test_run_advances_offset_and_stops() {
    let api = FakeApi::scripted(vec![
        Ok(vec![start(7, 42), press(8, 42, "lock")]),
        Err(anyhow!("connection reset")),
        Ok(vec![press(9, 42, "unlock")]),
    ]);
    let bus = MemoryBus::new();
    let bot = bot(&api, &bus, &[]).with_retry_delay(Duration::from_millis(5));
    let (tx, rx) = watch::channel(false);

    let task = tokio::spawn(bot.run(rx));
    tokio::time::sleep(Duration::from_millis(100)).await;
    tx.send(true).unwrap();

    let issued = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("bot did not stop")
        .unwrap();

    assert_eq!(issued, 2);
    assert_eq!(bus.published(TOPIC).len(), 2);
    assert_eq!(bus.flush_count(), 1);

    let offsets = api.offsets.lock().unwrap().clone();
    assert_eq!(&offsets[..3], &[0, 9, 9]);
    assert!(offsets[3..].iter().all(|o| *o == 10));
}

#[tokio::test]
async fn test_get_updates_over_http() {
    let body = json!({
        "ok": true,
        "result": [{
            "update_id": 31,
            "callback_query": {
                "id": "cb",
                "from": { "id": 42, "is_bot": false, "first_name": "Ops" },
                "chat_instance": "1",
                "data": "lock",
            }
        }]
    });
    let (base_url, server) = serve_once(200, &body.to_string()).await;
    let api = TelegramApi::new(&base_url, "T").unwrap();

    let updates = api.get_updates(30, 0).await.unwrap();

    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].update_id, 31);
    let query = updates[0].callback_query.as_ref().unwrap();
    assert_eq!(query.from.id, 42);
    assert_eq!(query.data.as_deref(), Some("lock"));

    let request = server.await.unwrap();
    assert!(request.starts_with("POST /botT/getUpdates"));
    assert!(request.contains(r#""offset":30"#));
}

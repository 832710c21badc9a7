//! bevy_ollama: a bevy plugin that sends composed prompts to a local ollama
//! `/api/generate` endpoint and streams the reply back as events.
//!
//! - `prompt::compose` merges the system / static / user fragments.
//! - each request runs on a blocking worker of a tiny tokio runtime; the
//!   main thread never waits on the network.
//! - workers push chunks into a bounded inbox; a system in `Update` drains
//!   it in order, updates the session's `ResponseView` and emits one
//!   `GenerateDeltaEvt` per chunk.
//!
//! endpoint protocol: https://github.com/ollama/ollama/blob/main/docs/api.md#generate-a-completion

use bevy::prelude::*;
use flume::{Receiver, Sender, TryRecvError};
use std::sync::Arc;

pub mod catalog;
pub mod client;
pub mod prompt;
pub mod sink;

pub use catalog::{Catalog, DEFAULT_MODEL, MODELS, STATIC_PROMPTS, SYSTEM_PROMPTS, resolve_model};
pub use client::{
    CancelHandle, DEFAULT_ENDPOINT, GenerateClient, GenerateConfig, GenerateError, StreamStats,
    decode_stream,
};
pub use prompt::{ComposedPrompt, NO_PROMPT, Presence, compose, compose_user_only};
pub use sink::{Outcome, RequestState, ResponseSink, ResponseView, Status, StatusKind, run_request};

/// the http client blocks, so requests run on this runtime's blocking pool
/// instead of bevy's task pools.
#[derive(Resource, Clone)]
pub struct TokioRt(pub Arc<tokio::runtime::Runtime>);

impl Default for TokioRt {
    fn default() -> Self {
        info!(target: "bevy_ollama", "OllamaPlugin: initializing Tokio multi-thread runtime");
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("tokio runtime");
        Self(Arc::new(rt))
    }
}

/// system ordering so uis can run after we emit events
#[derive(SystemSet, Debug, Hash, PartialEq, Eq, Clone)]
pub enum GenerateSet {
    /// bevy_ollama emits Generate* events here (in `Update`)
    Drain,
}

/// attach this to an entity that sends prompts.
#[derive(Component, Clone, Debug, Default)]
#[require(ResponseView)]
pub struct GenerateSession {
    /// model name; falls back to `GenerateConfig::model` when unset or empty.
    pub model: Option<String>,
}

/// insert this component to send `prompt` for the session entity.
/// ignored (with a warning) while that session is still sending.
#[derive(Component, Clone, Debug)]
pub struct GenerateRequest {
    pub prompt: String,
}

/// compose the fragments and enqueue the result on `target`.
/// returns false, sending nothing, when every fragment is empty.
pub fn send_prompt(
    commands: &mut Commands,
    target: Entity,
    system: Option<&str>,
    static_: Option<&str>,
    user: Option<&str>,
) -> bool {
    match prompt::compose(system, static_, user).into_text() {
        Some(text) => {
            send_composed(commands, target, text);
            true
        }
        None => {
            info!(target: "bevy_ollama", "send_prompt: {}, nothing sent", NO_PROMPT);
            false
        }
    }
}

/// enqueue an already composed prompt on `target`.
pub fn send_composed(commands: &mut Commands, target: Entity, prompt: impl Into<String>) {
    let prompt = prompt.into();
    info!(target: "bevy_ollama", "send_composed -> entity={:?} (len={})", target, prompt.len());
    commands.entity(target).insert(GenerateRequest { prompt });
}

#[derive(Event, Debug)]
pub struct GenerateStarted {
    pub entity: Entity,
}
#[derive(Event, Debug)]
pub struct GenerateDeltaEvt {
    pub entity: Entity,
    pub text: String,
}
#[derive(Event, Debug)]
pub struct GenerateCompletedEvt {
    pub entity: Entity,
    /// everything streamed for this request.
    pub text: String,
}
#[derive(Event, Debug)]
pub struct GenerateErrorEvt {
    pub entity: Entity,
    pub error: String,
}
#[derive(Event, Debug)]
pub struct GenerateCancelledEvt {
    pub entity: Entity,
}

/// cross-thread inbox; workers send, main thread drains.
/// bounded: a stalled frame makes workers wait instead of growing memory.
#[derive(Resource, Clone)]
struct StreamInbox {
    tx: Sender<StreamMsg>,
    rx: Receiver<StreamMsg>,
}

impl Default for StreamInbox {
    fn default() -> Self {
        let (tx, rx) = flume::bounded(2048);
        Self { tx, rx }
    }
}

#[derive(Debug)]
enum StreamMsg {
    Delta { entity: Entity, text: String },
    End { entity: Entity, outcome: Outcome },
}

/// worker-side sink: forwards everything to the inbox. a closed inbox means
/// the app is gone, so send errors are ignored.
struct InboxSink {
    entity: Entity,
    tx: Sender<StreamMsg>,
}

impl ResponseSink for InboxSink {
    fn on_chunk(&mut self, text: &str) {
        let _ = self.tx.send(StreamMsg::Delta { entity: self.entity, text: text.to_string() });
    }

    fn on_terminal(&mut self, outcome: Outcome) {
        let _ = self.tx.send(StreamMsg::End { entity: self.entity, outcome });
    }
}

/// bevy plugin: wires systems, events, resources.
/// uses the default endpoint unless a `GenerateClient` resource is inserted
/// before the plugin.
pub struct OllamaPlugin;

impl Plugin for OllamaPlugin {
    fn build(&self, app: &mut App) {
        info!(target: "bevy_ollama", "OllamaPlugin: build()");
        app.init_resource::<StreamInbox>()
            .add_event::<GenerateStarted>()
            .add_event::<GenerateDeltaEvt>()
            .add_event::<GenerateCompletedEvt>()
            .add_event::<GenerateErrorEvt>()
            .add_event::<GenerateCancelledEvt>()
            .configure_sets(Update, GenerateSet::Drain)
            .add_systems(
                Update,
                (
                    spawn_generate_requests,
                    drain_stream_inbox.in_set(GenerateSet::Drain),
                )
                    .chain(),
            );

        if app.world().get_resource::<GenerateClient>().is_none() {
            app.insert_resource(GenerateClient::default());
        }
        if app.world().get_resource::<TokioRt>().is_none() {
            app.insert_resource(TokioRt::default());
        }
    }
}

/// starts a worker for every pending request.
fn spawn_generate_requests(
    mut commands: Commands,
    client: Res<GenerateClient>,
    inbox: Res<StreamInbox>,
    rt: Res<TokioRt>,
    mut q: Query<(Entity, &GenerateSession, &GenerateRequest, &mut ResponseView)>,
    mut ev_start: EventWriter<GenerateStarted>,
) {
    for (e, session, req, mut view) in q.iter_mut() {
        // one-shot marker removal
        commands.entity(e).remove::<GenerateRequest>();

        if view.is_sending() {
            warn!(target: "bevy_ollama",
                "spawn_generate_requests: entity={:?} is still sending, request dropped", e
            );
            continue;
        }

        let model = session
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| client.config().model.clone());
        info!(target: "bevy_ollama",
            "spawn_generate_requests: entity={:?} model={} prompt_len={}",
            e, model, req.prompt.len()
        );

        let cancel = CancelHandle::new();
        view.begin(cancel.clone());
        ev_start.write(GenerateStarted { entity: e });

        let client = client.clone();
        let prompt = req.prompt.clone();
        let mut sink = InboxSink { entity: e, tx: inbox.tx.clone() };
        rt.0.spawn_blocking(move || {
            run_request(&client, &model, &prompt, &cancel, &mut sink);
        });
    }
}

/// drains the inbox in arrival order, updates views and emits events.
fn drain_stream_inbox(
    inbox: Res<StreamInbox>,
    mut views: Query<&mut ResponseView>,
    mut ev_delta: EventWriter<GenerateDeltaEvt>,
    mut ev_done: EventWriter<GenerateCompletedEvt>,
    mut ev_err: EventWriter<GenerateErrorEvt>,
    mut ev_cancel: EventWriter<GenerateCancelledEvt>,
) {
    // cap per frame to avoid long frames on bursty streams
    const MAX_PER_FRAME: usize = 512;
    for _ in 0..MAX_PER_FRAME {
        let msg = match inbox.rx.try_recv() {
            Ok(m) => m,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        };
        match msg {
            StreamMsg::Delta { entity, text } => {
                if let Ok(mut view) = views.get_mut(entity) {
                    view.on_chunk(&text);
                }
                ev_delta.write(GenerateDeltaEvt { entity, text });
            }
            StreamMsg::End { entity, outcome } => {
                let mut text = String::new();
                if let Ok(mut view) = views.get_mut(entity) {
                    view.on_terminal(outcome.clone());
                    text = view.text().to_string();
                }
                match outcome {
                    Outcome::Completed => {
                        info!(target: "bevy_ollama", "generate completed: entity={:?} final_len={}", entity, text.len());
                        ev_done.write(GenerateCompletedEvt { entity, text });
                    }
                    Outcome::Failed(error) => {
                        error!(target: "bevy_ollama", "generate failed: entity={:?} {}", entity, error);
                        ev_err.write(GenerateErrorEvt { entity, error });
                    }
                    Outcome::Cancelled => {
                        info!(target: "bevy_ollama", "generate cancelled: entity={:?}", entity);
                        ev_cancel.write(GenerateCancelledEvt { entity });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::serve_once;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn drain_app() -> App {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins);
        app.add_event::<GenerateDeltaEvt>();
        app.add_event::<GenerateCompletedEvt>();
        app.add_event::<GenerateErrorEvt>();
        app.add_event::<GenerateCancelledEvt>();
        app.insert_resource(StreamInbox::default());
        app.add_systems(Update, super::drain_stream_inbox);
        app
    }

    fn sending_session(app: &mut App) -> Entity {
        let e = app.world_mut().spawn(GenerateSession::default()).id();
        app.world_mut()
            .get_mut::<ResponseView>(e)
            .expect("ResponseView is required by GenerateSession")
            .begin(CancelHandle::new());
        e
    }

    #[test]
    fn send_prompt_attaches_composed_request() {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins);
        let e = app.world_mut().spawn(GenerateSession::default()).id();

        let sent = {
            let mut commands = app.world_mut().commands();
            super::send_prompt(&mut commands, e, Some("sys"), None, Some("hi"))
        };
        app.world_mut().flush();

        assert!(sent);
        let req = app.world().entity(e).get::<GenerateRequest>().expect("GenerateRequest exists");
        assert_eq!(
            req.prompt,
            "Treat this as a system prompt:\nsys\nTreat this as a user prompt:\nhi"
        );
    }

    #[test]
    fn send_prompt_with_nothing_sends_nothing() {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins);
        let e = app.world_mut().spawn(GenerateSession::default()).id();

        let sent = {
            let mut commands = app.world_mut().commands();
            super::send_prompt(&mut commands, e, Some(" "), Some(""), None)
        };
        app.world_mut().flush();

        assert!(!sent);
        assert!(app.world().entity(e).get::<GenerateRequest>().is_none());
    }

    #[test]
    fn drain_applies_each_chunk_in_order() {
        let mut app = drain_app();
        let e = sending_session(&mut app);

        {
            let tx = app.world().resource::<StreamInbox>().tx.clone();
            for text in ["He", "llo", "!"] {
                tx.send(StreamMsg::Delta { entity: e, text: text.into() }).unwrap();
            }
            tx.send(StreamMsg::End { entity: e, outcome: Outcome::Completed }).unwrap();
        }

        app.update();

        {
            let mut ev = app.world_mut().resource_mut::<Events<GenerateDeltaEvt>>();
            let deltas: Vec<_> = ev.drain().map(|d| d.text).collect();
            assert_eq!(deltas, vec!["He", "llo", "!"]);
        }
        {
            let mut ev = app.world_mut().resource_mut::<Events<GenerateCompletedEvt>>();
            let done: Vec<_> = ev.drain().collect();
            assert_eq!(done.len(), 1);
            assert_eq!(done[0].text, "Hello!");
        }
        let view = app.world().entity(e).get::<ResponseView>().unwrap();
        assert_eq!(view.text(), "Hello!");
        assert_eq!(view.state(), RequestState::Succeeded);
    }

    #[test]
    fn drain_reports_failure_and_clears_sending() {
        let mut app = drain_app();
        let e = sending_session(&mut app);

        {
            let tx = app.world().resource::<StreamInbox>().tx.clone();
            tx.send(StreamMsg::Delta { entity: e, text: "part".into() }).unwrap();
            tx.send(StreamMsg::End { entity: e, outcome: Outcome::Failed("timeout: read".into()) })
                .unwrap();
        }

        app.update();

        {
            let mut ev = app.world_mut().resource_mut::<Events<GenerateErrorEvt>>();
            let errs: Vec<_> = ev.drain().collect();
            assert_eq!(errs.len(), 1);
            assert_eq!(errs[0].error, "timeout: read");
        }
        {
            let mut ev = app.world_mut().resource_mut::<Events<GenerateCompletedEvt>>();
            assert_eq!(ev.drain().count(), 0);
        }
        let view = app.world().entity(e).get::<ResponseView>().unwrap();
        assert!(!view.is_sending());
        assert_eq!(view.text(), "part");
        assert_eq!(view.status().unwrap().message, "Request failed: timeout: read");
    }

    #[test]
    fn drain_reports_cancel_without_an_error() {
        let mut app = drain_app();
        let e = sending_session(&mut app);

        {
            let tx = app.world().resource::<StreamInbox>().tx.clone();
            tx.send(StreamMsg::Delta { entity: e, text: "half".into() }).unwrap();
            tx.send(StreamMsg::End { entity: e, outcome: Outcome::Cancelled }).unwrap();
        }

        app.update();

        {
            let mut ev = app.world_mut().resource_mut::<Events<GenerateCancelledEvt>>();
            let cancelled: Vec<_> = ev.drain().collect();
            assert_eq!(cancelled.len(), 1);
            assert_eq!(cancelled[0].entity, e);
        }
        {
            let mut ev = app.world_mut().resource_mut::<Events<GenerateErrorEvt>>();
            assert_eq!(ev.drain().count(), 0);
        }
        {
            let mut ev = app.world_mut().resource_mut::<Events<GenerateCompletedEvt>>();
            assert_eq!(ev.drain().count(), 0);
        }
        let view = app.world().entity(e).get::<ResponseView>().unwrap();
        assert_eq!(view.state(), RequestState::Cancelled);
        assert!(!view.is_sending());
        assert_eq!(view.text(), "half");
        let status = view.status().unwrap();
        assert_eq!(status.kind, StatusKind::Info);
        assert_eq!(status.message, crate::sink::STATUS_CANCELLED);
    }

    #[derive(Resource, Default)]
    struct Seen {
        started: usize,
        deltas: Vec<String>,
        completed: usize,
        errors: Vec<String>,
    }

    fn record(
        mut seen: ResMut<Seen>,
        mut started: EventReader<GenerateStarted>,
        mut deltas: EventReader<GenerateDeltaEvt>,
        mut done: EventReader<GenerateCompletedEvt>,
        mut errs: EventReader<GenerateErrorEvt>,
    ) {
        seen.started += started.read().count();
        for d in deltas.read() {
            seen.deltas.push(d.text.clone());
        }
        seen.completed += done.read().count();
        for e in errs.read() {
            seen.errors.push(e.error.clone());
        }
    }

    fn plugin_app(endpoint: String) -> App {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins);
        app.insert_resource(crate::client::tests::client_for(endpoint));
        app.add_plugins(OllamaPlugin);
        app.init_resource::<Seen>();
        app.add_systems(Update, record.after(GenerateSet::Drain));
        app
    }

    fn run_until_idle(app: &mut App, e: Entity) {
        for _ in 0..500 {
            app.update();
            let view = app.world().entity(e).get::<ResponseView>().unwrap();
            if view.state().is_terminal() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("request never finished");
    }

    #[test]
    fn plugin_streams_a_request_end_to_end() {
        let (url, requests) = serve_once(
            "200 OK",
            "{\"response\":\"He\"}\n{\"response\":\"llo\"}\n\n{\"response\":\"!\"}\n",
        );
        let mut app = plugin_app(url);
        let e = app
            .world_mut()
            .spawn(GenerateSession { model: Some("llama3.2".into()) })
            .id();
        {
            let mut commands = app.world_mut().commands();
            super::send_prompt(&mut commands, e, None, Some("Explain this in simple terms."), Some("ndjson"));
        }
        app.world_mut().flush();

        run_until_idle(&mut app, e);

        let view = app.world().entity(e).get::<ResponseView>().unwrap();
        assert_eq!(view.text(), "Hello!");
        assert_eq!(view.state(), RequestState::Succeeded);
        let seen = app.world().resource::<Seen>();
        assert_eq!(seen.started, 1);
        assert_eq!(seen.deltas, vec!["He", "llo", "!"]);
        assert_eq!(seen.completed, 1);
        assert!(seen.errors.is_empty());

        let body: serde_json::Value = serde_json::from_slice(&requests.recv().unwrap()).unwrap();
        assert_eq!(body["prompt"], "Explain this in simple terms.\nndjson");
        assert_eq!(body["model"], "llama3.2");
    }

    #[test]
    fn plugin_reports_http_errors_once() {
        let (url, _requests) = serve_once("500 Internal Server Error", "");
        let mut app = plugin_app(url);
        let e = app.world_mut().spawn(GenerateSession::default()).id();
        {
            let mut commands = app.world_mut().commands();
            super::send_composed(&mut commands, e, "hi");
        }
        app.world_mut().flush();

        run_until_idle(&mut app, e);

        let view = app.world().entity(e).get::<ResponseView>().unwrap();
        assert_eq!(view.state(), RequestState::Failed);
        assert_eq!(view.text(), "");
        let seen = app.world().resource::<Seen>();
        assert_eq!(seen.started, 1);
        assert!(seen.deltas.is_empty());
        assert_eq!(seen.completed, 0);
        assert_eq!(seen.errors, vec!["http status 500"]);
    }

    #[test]
    fn second_request_while_sending_is_dropped() {
        let mut app = plugin_app(DEFAULT_ENDPOINT.to_string());
        let e = sending_session(&mut app);
        app.world_mut()
            .entity_mut(e)
            .insert(GenerateRequest { prompt: "again".into() });

        app.update();

        assert!(app.world().entity(e).get::<GenerateRequest>().is_none());
        assert_eq!(app.world().resource::<Seen>().started, 0);
        assert!(app.world().entity(e).get::<ResponseView>().unwrap().is_sending());
    }
}

//! bevy + bevy_ollama prompt window for a local ollama server.
//! - three text boxes: system prompt, static prompt, prompt (tab cycles focus).
//! - preset buttons fill the system / static boxes from the built-in catalogs.
//! - `<` / `>` pick the model; `send` is disabled while a reply streams.
//! - the reply renders chunk by chunk; the status line is color coded.
//!
//! env:
//!   OLLAMA_URL    (default http://localhost:11434/api/generate)
//!   OLLAMA_MODEL  (catalog index or model name; default llama3.1:8b)

use bevy::input::keyboard::{KeyCode, KeyboardInput};
use bevy::prelude::*;
use bevy_ollama::{
    GenerateClient, GenerateConfig, GenerateErrorEvt, GenerateSession, GenerateSet, MODELS,
    OllamaPlugin, RequestState, ResponseView, STATIC_PROMPTS, SYSTEM_PROMPTS, StatusKind,
    resolve_model, send_prompt,
};

// ---------------------- ui tags ----------------------

#[derive(Component)]
struct SystemText;
#[derive(Component)]
struct StaticText;
#[derive(Component)]
struct PromptText;
#[derive(Component)]
struct ModelText;
#[derive(Component)]
struct ResponseText;
#[derive(Component)]
struct StatusText;
#[derive(Component)]
struct SendLabel;

#[derive(Component, Clone, Copy, Debug, PartialEq, Eq)]
enum Action {
    PrevModel,
    NextModel,
    SystemPreset,
    StaticPreset,
    Send,
    Cancel,
}

// ---------------------- app state ----------------------

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
enum Field {
    System,
    Static,
    #[default]
    Prompt,
}

#[derive(Resource, Default)]
struct Form {
    system: String,
    static_: String,
    prompt: String,
    focus: Field,
    // next preset to apply; cycles through the catalog
    system_preset: usize,
    static_preset: usize,
    model: usize,
    // shown when a send is refused before reaching the plugin
    notice: Option<String>,
}

#[derive(Resource, Clone, Copy)]
struct Session(Entity);

const BTN: Color = Color::srgb(0.2, 0.2, 0.25);
const BTN_HOVER: Color = Color::srgb(0.25, 0.25, 0.3);
const BTN_PRESSED: Color = Color::srgb(0.3, 0.3, 0.35);

fn main() {
    let endpoint = std::env::var("OLLAMA_URL").unwrap_or_else(|_| bevy_ollama::DEFAULT_ENDPOINT.to_string());
    let model = resolve_model(std::env::var("OLLAMA_MODEL").ok().as_deref());
    let form = Form {
        model: MODELS.position_of_value(model).unwrap_or_default(),
        ..default()
    };

    App::new()
        .insert_resource(ClearColor(Color::srgb_u8(18, 18, 20)))
        .insert_resource(GenerateClient::new(GenerateConfig {
            endpoint,
            model: model.to_string(),
            ..default()
        }))
        .insert_resource(form)
        .add_plugins(DefaultPlugins)
        .add_plugins(OllamaPlugin)
        .add_systems(Startup, setup)
        .add_systems(Update, (handle_text_input, handle_buttons, refresh_form_texts))
        .add_systems(Update, (render_response, on_error).after(GenerateSet::Drain))
        .run();
}

// ---------------------- setup ui ----------------------

fn button(p: &mut ChildSpawnerCommands, label: &str, action: Action, width: f32, font: &TextFont) {
    p.spawn((
        Button,
        Node {
            width: Val::Px(width),
            height: Val::Px(28.0),
            align_items: AlignItems::Center,
            justify_content: JustifyContent::Center,
            ..default()
        },
        BackgroundColor(BTN),
        action,
    ))
    .with_children(|b| {
        let mut label_cmd = b.spawn((Text::new(label), font.clone(), TextColor(Color::WHITE)));
        if action == Action::Send {
            label_cmd.insert(SendLabel);
        }
    });
}

fn text_box(p: &mut ChildSpawnerCommands, tag: impl Component, font: &TextFont) {
    p.spawn((
        Node {
            width: Val::Percent(100.0),
            min_height: Val::Px(48.0),
            padding: UiRect::all(Val::Px(6.0)),
            ..default()
        },
        BackgroundColor(Color::srgb(0.10, 0.10, 0.12)),
    ))
    .with_children(|b| {
        b.spawn((Text::new(""), font.clone(), TextColor(Color::WHITE), tag));
    });
}

fn row() -> Node {
    Node {
        width: Val::Percent(100.0),
        height: Val::Auto,
        column_gap: Val::Px(8.0),
        flex_direction: FlexDirection::Row,
        align_items: AlignItems::Center,
        ..default()
    }
}

fn setup(mut commands: Commands, form: Res<Form>) {
    commands.spawn(Camera2d);

    let model = MODELS.entry(form.model).map(|(_, m)| m.to_string());
    let session = commands.spawn(GenerateSession { model }).id();
    commands.insert_resource(Session(session));

    let small = TextFont { font_size: 14.0, ..default() };
    let large = TextFont { font_size: 16.0, ..default() };

    commands
        .spawn(Node {
            width: Val::Percent(100.0),
            height: Val::Percent(100.0),
            flex_direction: FlexDirection::Column,
            row_gap: Val::Px(8.0),
            padding: UiRect::all(Val::Px(12.0)),
            ..default()
        })
        .with_children(|p| {
            p.spawn(row()).with_children(|r| {
                button(r, "<", Action::PrevModel, 28.0, &small);
                r.spawn((Text::new("model: "), small.clone(), TextColor(Color::WHITE), ModelText));
                button(r, ">", Action::NextModel, 28.0, &small);
            });

            p.spawn(row()).with_children(|r| {
                button(r, "system preset", Action::SystemPreset, 130.0, &small);
                button(r, "static preset", Action::StaticPreset, 130.0, &small);
            });
            text_box(p, SystemText, &small);
            text_box(p, StaticText, &small);
            text_box(p, PromptText, &small);

            p.spawn(row()).with_children(|r| {
                button(r, "send", Action::Send, 90.0, &small);
                button(r, "cancel", Action::Cancel, 90.0, &small);
            });

            p.spawn((
                Node {
                    width: Val::Percent(100.0),
                    flex_grow: 1.0,
                    padding: UiRect::all(Val::Px(8.0)),
                    overflow: Overflow::clip(),
                    ..default()
                },
                BackgroundColor(Color::srgb(0.08, 0.08, 0.10)),
            ))
            .with_children(|b| {
                b.spawn((
                    Text::new(""),
                    large.clone(),
                    TextColor(Color::srgb_u8(200, 200, 200)),
                    ResponseText,
                ));
            });

            p.spawn((Text::new(""), small.clone(), TextColor(Color::WHITE), StatusText));
        });
}

// ---------------------- input & buttons ----------------------

fn handle_text_input(
    mut commands: Commands,
    mut ev_kbd: EventReader<KeyboardInput>,
    keys: Res<ButtonInput<KeyCode>>,
    mut form: ResMut<Form>,
    session: Res<Session>,
    views: Query<&ResponseView>,
) {
    if keys.just_pressed(KeyCode::Tab) {
        form.focus = match form.focus {
            Field::System => Field::Static,
            Field::Static => Field::Prompt,
            Field::Prompt => Field::System,
        };
        info!(target: "chat", "focus -> {:?}", form.focus);
    }

    for ev in ev_kbd.read() {
        if !ev.state.is_pressed() {
            continue;
        }
        if let Some(txt) = &ev.text {
            let s = txt.replace(['\r', '\n', '\t'], "");
            let field = focused(&mut form);
            field.push_str(&s);
        }
    }

    if keys.just_pressed(KeyCode::Backspace) {
        focused(&mut form).pop();
    }

    if keys.just_pressed(KeyCode::Enter) {
        if form.focus == Field::Prompt {
            try_send(&mut commands, &mut form, session.0, &views);
        } else {
            focused(&mut form).push('\n');
        }
    }
}

fn focused(form: &mut Form) -> &mut String {
    match form.focus {
        Field::System => &mut form.system,
        Field::Static => &mut form.static_,
        Field::Prompt => &mut form.prompt,
    }
}

fn try_send(commands: &mut Commands, form: &mut Form, session: Entity, views: &Query<&ResponseView>) {
    // the send trigger stays disabled until the previous reply ends
    if views.get(session).is_ok_and(|v| v.is_sending()) {
        return;
    }
    if send_prompt(
        commands,
        session,
        Some(&form.system),
        Some(&form.static_),
        Some(&form.prompt),
    ) {
        form.notice = None;
    } else {
        form.notice = Some(bevy_ollama::NO_PROMPT.to_string());
    }
}

fn handle_buttons(
    mut commands: Commands,
    mut q: Query<(&Interaction, &Action, &mut BackgroundColor), Changed<Interaction>>,
    mut form: ResMut<Form>,
    session: Res<Session>,
    views: Query<&ResponseView>,
    mut sessions: Query<&mut GenerateSession>,
) {
    for (interaction, action, mut bg) in &mut q {
        match *interaction {
            Interaction::Hovered => bg.0 = BTN_HOVER,
            Interaction::None => bg.0 = BTN,
            Interaction::Pressed => {
                bg.0 = BTN_PRESSED;
                match action {
                    Action::PrevModel | Action::NextModel => {
                        let n = MODELS.len();
                        form.model = if *action == Action::NextModel {
                            (form.model + 1) % n
                        } else {
                            (form.model + n - 1) % n
                        };
                        if let (Some((_, model)), Ok(mut s)) = (MODELS.entry(form.model), sessions.get_mut(session.0)) {
                            info!(target: "chat", "model -> '{}'", model);
                            s.model = Some(model.to_string());
                        }
                    }
                    Action::SystemPreset => {
                        if let Some((name, text)) = SYSTEM_PROMPTS.entry(form.system_preset) {
                            info!(target: "chat", "system preset -> {}", name);
                            form.system = text.to_string();
                            form.system_preset = (form.system_preset + 1) % SYSTEM_PROMPTS.len();
                        }
                    }
                    Action::StaticPreset => {
                        if let Some((name, text)) = STATIC_PROMPTS.entry(form.static_preset) {
                            info!(target: "chat", "static preset -> {}", name);
                            form.static_ = text.to_string();
                            form.static_preset = (form.static_preset + 1) % STATIC_PROMPTS.len();
                        }
                    }
                    Action::Send => try_send(&mut commands, &mut form, session.0, &views),
                    Action::Cancel => {
                        if let Ok(view) = views.get(session.0) {
                            view.cancel();
                        }
                    }
                }
            }
        }
    }
}

// ---------------------- text refresh ----------------------

fn refresh_form_texts(
    form: Res<Form>,
    mut sets: ParamSet<(
        Query<&mut Text, With<SystemText>>,
        Query<&mut Text, With<StaticText>>,
        Query<&mut Text, With<PromptText>>,
        Query<&mut Text, With<ModelText>>,
    )>,
) {
    if !form.is_changed() {
        return;
    }
    let caret = |f: Field| if form.focus == f { " |" } else { "" };
    if let Ok(mut t) = sets.p0().single_mut() {
        t.0 = format!("system: {}{}", form.system, caret(Field::System));
    }
    if let Ok(mut t) = sets.p1().single_mut() {
        t.0 = format!("static: {}{}", form.static_, caret(Field::Static));
    }
    if let Ok(mut t) = sets.p2().single_mut() {
        t.0 = format!("> {}{}", form.prompt, caret(Field::Prompt));
    }
    if let Ok(mut t) = sets.p3().single_mut() {
        let model = MODELS.entry(form.model).map(|(_, m)| m).unwrap_or("<none>");
        t.0 = format!("model: {model}");
    }
}

// ---------------------- generate events ----------------------

fn render_response(
    form: Res<Form>,
    session: Res<Session>,
    views: Query<Ref<ResponseView>>,
    mut sets: ParamSet<(
        Query<&mut Text, With<ResponseText>>,
        Query<(&mut Text, &mut TextColor), With<StatusText>>,
        Query<&mut Text, With<SendLabel>>,
    )>,
) {
    let Ok(view) = views.get(session.0) else {
        return;
    };
    if !view.is_changed() && !form.is_changed() {
        return;
    }

    if let Ok(mut t) = sets.p0().single_mut() {
        t.0 = view.text().to_string();
    }
    if let Ok((mut t, mut color)) = sets.p1().single_mut() {
        let (message, kind) = match (&form.notice, view.status()) {
            (Some(notice), _) if !view.is_sending() => (notice.clone(), StatusKind::Error),
            (_, Some(status)) => (status.message.clone(), status.kind),
            _ => (String::new(), StatusKind::Info),
        };
        t.0 = message;
        color.0 = match kind {
            StatusKind::Info => Color::WHITE,
            StatusKind::Success => Color::srgb_u8(163, 190, 140),
            StatusKind::Error => Color::srgb_u8(191, 97, 106),
        };
    }
    if let Ok(mut t) = sets.p2().single_mut() {
        t.0 = if view.state() == RequestState::Sending { "sending..." } else { "send" }.to_string();
    }
}

fn on_error(mut ev: EventReader<GenerateErrorEvt>) {
    for GenerateErrorEvt { entity, error } in ev.read() {
        error!(target: "chat", "generate error (entity={:?}): {}", entity, error);
    }
}

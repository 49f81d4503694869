mod activity;
mod api;
mod config;
mod fragment;
mod identity;
mod markdown;
mod submit;

use iced::{
    alignment,
    widget::{button, checkbox, column, container, pick_list, row, scrollable, text, text_input},
    window, Element, Font, Length, Subscription, Task, Theme,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

const RESULTS_REGION_ID: &str = "results";
const SOURCES_REGION_ID: &str = "sourcesSection";

fn main() -> iced::Result {
    let config = config::Config::load();

    iced::application("ExpertDesk", App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window::Settings {
            size: iced::Size::new(config.window.width as f32, config.window.height as f32),
            position: window::Position::Centered,
            ..Default::default()
        })
        .default_font(Font::MONOSPACE)
        .run_with(App::new)
}

#[derive(Debug, Clone)]
enum Message {
    QueryChanged(String),
    Submit,
    QueryFinished(Result<String, api::ApiError>),
    Tick,

    ToggleRerank(bool),
    ToggleDeepResearch(bool),
    ToggleIncludeSources(bool),
    ToggleExecutionTrace(bool),
    ToggleCascade(bool),
    ToggleRouting(bool),
    ToggleCycle(bool),

    IdentitySelected(identity::Identity),

    ChatSelected(String),
    NewChat,
    ChatCreated(Option<String>),
    DeleteChat(String),
    ChatDeleted(String),
    MessageInputChanged(String),
    SendMessage,
    MessageSent,

    ToggleExamples,
    ExamplesLoaded(Vec<api::QueryExample>),
    ExamplesFailed,
    UseExample(String),

    HistoryRefreshed(Vec<api::ChatMessage>),
    ChatsRefreshed(Vec<api::ChatSummary>),
    RefreshFailed,
}

#[derive(Clone, Copy)]
enum Phase {
    Idle,
    Submitting { started: Instant },
}

struct App {
    client: Arc<api::ApiClient>,
    store: identity::SqliteIdentityStore,
    identity: identity::Identity,

    query_text: String,
    rerank: bool,
    deep_research: bool,
    include_sources: bool,
    include_execution_trace: bool,
    use_cascade_pattern: bool,
    use_routing_pattern: bool,
    use_cycle_pattern: bool,

    phase: Phase,
    progress_text: String,
    results_region: Option<String>,
    csrf_token: Option<String>,

    chats: Vec<api::ChatSummary>,
    current_chat: Option<String>,
    history: Vec<api::ChatMessage>,
    message_input: String,
    sending: bool,

    examples_open: bool,
    examples_loading: bool,
    examples_failed: bool,
    examples: Option<Vec<api::QueryExample>>,
}

impl App {
    fn new() -> (Self, Task<Message>) {
        let config = config::Config::load();

        let store = identity::SqliteIdentityStore::open_default();
        if let Err(e) = store.init() {
            eprintln!("Warning: could not initialize settings store: {}", e);
        }
        let active = identity::current(&store);

        let client = Arc::new(api::ApiClient::new(
            config.server.base_url.clone(),
            Duration::from_secs(config.server.query_timeout_secs),
            config.server.history_page_size,
        ));

        let app = App {
            client,
            store,
            identity: active,
            query_text: String::new(),
            rerank: false,
            deep_research: false,
            include_sources: false,
            include_execution_trace: false,
            use_cascade_pattern: false,
            use_routing_pattern: false,
            use_cycle_pattern: false,
            phase: Phase::Idle,
            progress_text: String::new(),
            results_region: None,
            csrf_token: None,
            chats: Vec::new(),
            current_chat: None,
            history: Vec::new(),
            message_input: String::new(),
            sending: false,
            examples_open: false,
            examples_loading: false,
            examples_failed: false,
            examples: None,
        };

        let startup = app.refresh_chats_task();
        (app, startup)
    }

    fn submitting(&self) -> bool {
        matches!(self.phase, Phase::Submitting { .. })
    }

    fn build_form(&self) -> api::QueryForm {
        api::QueryForm {
            query: self.query_text.trim().to_string(),
            chat_id: self.current_chat.clone(),
            rerank: self.rerank,
            deep_research: self.deep_research,
            include_sources: self.include_sources,
            include_execution_trace: self.include_execution_trace,
            use_cascade_pattern: self.use_cascade_pattern,
            use_routing_pattern: self.use_routing_pattern,
            use_cycle_pattern: self.use_cycle_pattern,
            ..api::QueryForm::default()
        }
    }

    /// Fire-and-forget: failures are logged, never shown, and never
    /// touch the primary result.
    fn refresh_history_task(&self) -> Task<Message> {
        let Some(chat_id) = self.current_chat.clone() else {
            return Task::none();
        };
        let client = self.client.clone();
        let identity = self.identity.clone();
        Task::future(async move {
            match client.chat_history(&identity, &chat_id).await {
                Ok(messages) => Message::HistoryRefreshed(messages),
                Err(e) => {
                    activity::log_with(
                        activity::Kind::Refresh,
                        format!("Chat history refresh failed: {e}"),
                    );
                    Message::RefreshFailed
                }
            }
        })
    }

    fn refresh_chats_task(&self) -> Task<Message> {
        let client = self.client.clone();
        let identity = self.identity.clone();
        Task::future(async move {
            match client.chats(&identity).await {
                Ok(chats) => Message::ChatsRefreshed(chats),
                Err(e) => {
                    activity::log_with(
                        activity::Kind::Refresh,
                        format!("Chat list refresh failed: {e}"),
                    );
                    Message::RefreshFailed
                }
            }
        })
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::QueryChanged(value) => {
                self.query_text = value;
                Task::none()
            }
            Message::Submit => {
                if !submit::submit_enabled(&self.query_text, self.submitting()) {
                    return Task::none();
                }
                if let Err(message) =
                    submit::validate_patterns(self.use_cascade_pattern, self.use_cycle_pattern)
                {
                    // blocked before any network call
                    self.results_region = Some(submit::error_fragment(&message));
                    return Task::none();
                }

                self.phase = Phase::Submitting {
                    started: Instant::now(),
                };
                self.progress_text = submit::progress_message(Duration::ZERO);

                let client = self.client.clone();
                let identity = self.identity.clone();
                let form = self.build_form();
                Task::future(async move {
                    Message::QueryFinished(client.submit_query(&identity, &form).await)
                })
            }
            Message::Tick => {
                if let Phase::Submitting { started } = self.phase {
                    self.progress_text = submit::progress_message(started.elapsed());
                }
                Task::none()
            }
            Message::QueryFinished(result) => {
                if !self.submitting() {
                    // a late arrival after the state machine moved on
                    return Task::none();
                }
                self.phase = Phase::Idle;
                self.progress_text.clear();

                match result {
                    Ok(html) => {
                        if let Some(token) = fragment::extract_csrf_token(&html) {
                            self.csrf_token = Some(token);
                        }
                        match fragment::extract_region(&html, RESULTS_REGION_ID) {
                            Some(region) => {
                                self.results_region = Some(fragment::expand_markdown(&region));
                                return Task::batch([
                                    self.refresh_history_task(),
                                    self.refresh_chats_task(),
                                ]);
                            }
                            None => {
                                activity::log_with(
                                    activity::Kind::Http,
                                    "Query response had no results region",
                                );
                                self.results_region = Some(submit::error_fragment(
                                    "The server response did not contain a results section.",
                                ));
                            }
                        }
                    }
                    Err(error) => {
                        activity::log_with(
                            activity::Kind::Http,
                            format!("Query failed: {error}"),
                        );
                        self.results_region =
                            Some(submit::error_fragment(&submit::friendly_error(&error)));
                    }
                }
                Task::none()
            }

            Message::ToggleRerank(checked) => {
                self.rerank = checked;
                Task::none()
            }
            Message::ToggleDeepResearch(checked) => {
                self.deep_research = checked;
                Task::none()
            }
            Message::ToggleIncludeSources(checked) => {
                self.include_sources = checked;
                Task::none()
            }
            Message::ToggleExecutionTrace(checked) => {
                self.include_execution_trace = checked;
                Task::none()
            }
            Message::ToggleCascade(checked) => {
                self.use_cascade_pattern = checked;
                if checked {
                    self.use_cycle_pattern = false;
                }
                Task::none()
            }
            Message::ToggleRouting(checked) => {
                self.use_routing_pattern = checked;
                Task::none()
            }
            Message::ToggleCycle(checked) => {
                self.use_cycle_pattern = checked;
                if checked {
                    self.use_cascade_pattern = false;
                }
                Task::none()
            }

            Message::IdentitySelected(choice) => {
                if let Err(e) = identity::select(&self.store, &choice) {
                    activity::log(format!("Could not persist identity selection: {e}"));
                }
                // Full reset, the desktop analog of the original's forced
                // page reload: every later request resolves the identity
                // afresh from the store.
                activity::clear();
                let (fresh, startup) = App::new();
                *self = fresh;
                startup
            }

            Message::ChatSelected(chat_id) => {
                self.current_chat = Some(chat_id);
                self.history.clear();
                self.refresh_history_task()
            }
            Message::NewChat => {
                let client = self.client.clone();
                let identity = self.identity.clone();
                Task::future(async move {
                    match client.new_chat(&identity).await {
                        Ok(chat_id) => Message::ChatCreated(chat_id),
                        Err(e) => {
                            activity::log_with(
                                activity::Kind::Http,
                                format!("Could not create chat: {e}"),
                            );
                            Message::RefreshFailed
                        }
                    }
                })
            }
            Message::ChatCreated(chat_id) => {
                if let Some(chat_id) = chat_id {
                    self.current_chat = Some(chat_id);
                    self.history.clear();
                    Task::batch([self.refresh_chats_task(), self.refresh_history_task()])
                } else {
                    self.refresh_chats_task()
                }
            }
            Message::DeleteChat(chat_id) => {
                let client = self.client.clone();
                let identity = self.identity.clone();
                let csrf = self.csrf_token.clone();
                Task::future(async move {
                    match client
                        .delete_chat(&identity, &chat_id, csrf.as_deref())
                        .await
                    {
                        Ok(()) => Message::ChatDeleted(chat_id),
                        Err(e) => {
                            activity::log_with(
                                activity::Kind::Http,
                                format!("Could not delete chat: {e}"),
                            );
                            Message::RefreshFailed
                        }
                    }
                })
            }
            Message::ChatDeleted(chat_id) => {
                if self.current_chat.as_deref() == Some(chat_id.as_str()) {
                    self.current_chat = None;
                    self.history.clear();
                }
                self.refresh_chats_task()
            }
            Message::MessageInputChanged(value) => {
                self.message_input = value;
                Task::none()
            }
            Message::SendMessage => {
                let message = self.message_input.trim().to_string();
                let Some(chat_id) = self.current_chat.clone() else {
                    return Task::none();
                };
                if message.is_empty() || self.sending {
                    return Task::none();
                }
                self.sending = true;
                let client = self.client.clone();
                let identity = self.identity.clone();
                Task::future(async move {
                    if let Err(e) = client.send_message(&identity, &chat_id, &message).await {
                        activity::log_with(
                            activity::Kind::Http,
                            format!("Could not send message: {e}"),
                        );
                    }
                    Message::MessageSent
                })
            }
            Message::MessageSent => {
                self.sending = false;
                self.message_input.clear();
                self.refresh_history_task()
            }

            Message::ToggleExamples => {
                self.examples_open = !self.examples_open;
                if self.examples_open && self.examples.is_none() && !self.examples_loading {
                    self.examples_loading = true;
                    self.examples_failed = false;
                    let client = self.client.clone();
                    let identity = self.identity.clone();
                    return Task::future(async move {
                        match client.query_examples(&identity).await {
                            Ok(examples) => Message::ExamplesLoaded(examples),
                            Err(e) => {
                                activity::log_with(
                                    activity::Kind::Http,
                                    format!("Could not load query examples: {e}"),
                                );
                                Message::ExamplesFailed
                            }
                        }
                    });
                }
                Task::none()
            }
            Message::ExamplesLoaded(examples) => {
                self.examples_loading = false;
                self.examples = Some(examples);
                Task::none()
            }
            Message::ExamplesFailed => {
                self.examples_loading = false;
                self.examples_failed = true;
                Task::none()
            }
            Message::UseExample(query) => {
                self.query_text = query;
                self.examples_open = false;
                Task::none()
            }

            Message::HistoryRefreshed(messages) => {
                // wholesale replacement, no diffing
                self.history = messages;
                Task::none()
            }
            Message::ChatsRefreshed(chats) => {
                self.chats = chats;
                Task::none()
            }
            Message::RefreshFailed => Task::none(),
        }
    }

    fn subscription(&self) -> Subscription<Message> {
        match self.phase {
            Phase::Submitting { .. } => {
                iced::time::every(Duration::from_secs(5)).map(|_| Message::Tick)
            }
            Phase::Idle => Subscription::none(),
        }
    }

    fn view(&self) -> Element<Message> {
        let body = row![self.sidebar(), self.center_panel(), self.history_panel()]
            .spacing(12)
            .height(Length::Fill);

        let status_line = activity::recent(1)
            .into_iter()
            .next()
            .map(|entry| entry.text)
            .unwrap_or_default();

        container(
            column![self.header(), body, text(status_line).size(12)]
                .spacing(10)
                .padding(12),
        )
        .width(Length::Fill)
        .height(Length::Fill)
        .into()
    }

    fn header(&self) -> Element<Message> {
        row![
            text("ExpertDesk").size(22),
            container(pick_list(
                identity::all(),
                Some(self.identity.clone()),
                Message::IdentitySelected,
            ))
            .width(Length::Fill)
            .align_x(alignment::Horizontal::Right),
        ]
        .spacing(10)
        .align_y(alignment::Vertical::Center)
        .into()
    }

    fn sidebar(&self) -> Element<Message> {
        let mut chats =
            column![button(text("New Chat").size(14)).on_press(Message::NewChat)].spacing(6);

        for chat in &self.chats {
            let name = if chat.name.trim().is_empty() {
                "Untitled Chat".to_string()
            } else {
                chat.name.clone()
            };
            let selected = self.current_chat.as_deref() == Some(chat.id.as_str());
            let label = column![
                text(name).size(14),
                text(submit::chat_timestamp(&chat.created_at)).size(11),
            ]
            .spacing(2);

            let mut entry = row![button(label)
                .on_press_maybe((!selected).then(|| Message::ChatSelected(chat.id.clone())))
                .width(Length::Fill)]
            .spacing(4);
            if !chat.is_default {
                entry = entry
                    .push(button(text("x").size(12)).on_press(Message::DeleteChat(chat.id.clone())));
            }
            chats = chats.push(entry);
        }

        container(scrollable(chats).height(Length::Fill))
            .width(Length::Fixed(230.0))
            .into()
    }

    fn center_panel(&self) -> Element<Message> {
        let query_input = text_input("Ask about experts, skills, projects...", &self.query_text)
            .on_input(Message::QueryChanged)
            .on_submit(Message::Submit)
            .padding(10)
            .size(15);

        let options = column![
            row![
                checkbox("Rerank", self.rerank).on_toggle(Message::ToggleRerank),
                checkbox("Deep research", self.deep_research)
                    .on_toggle(Message::ToggleDeepResearch),
                checkbox("Include sources", self.include_sources)
                    .on_toggle(Message::ToggleIncludeSources),
                checkbox("Execution trace", self.include_execution_trace)
                    .on_toggle(Message::ToggleExecutionTrace),
            ]
            .spacing(14),
            row![
                checkbox("Cascade pattern", self.use_cascade_pattern)
                    .on_toggle(Message::ToggleCascade),
                checkbox("Routing pattern", self.use_routing_pattern)
                    .on_toggle(Message::ToggleRouting),
                checkbox("Cycle pattern", self.use_cycle_pattern).on_toggle(Message::ToggleCycle),
            ]
            .spacing(14),
        ]
        .spacing(6);

        let submit_label = if self.submitting() {
            "Processing..."
        } else {
            "Submit Query"
        };
        let actions = row![
            button(text(submit_label).size(14)).on_press_maybe(
                submit::submit_enabled(&self.query_text, self.submitting())
                    .then_some(Message::Submit),
            ),
            button(text("Examples").size(14)).on_press(Message::ToggleExamples),
        ]
        .spacing(10);

        let output: Element<Message> = if self.submitting() {
            container(text(self.progress_text.as_str()).size(15))
                .width(Length::Fill)
                .height(Length::Fill)
                .align_x(alignment::Horizontal::Center)
                .align_y(alignment::Vertical::Center)
                .into()
        } else if self.examples_open {
            self.examples_panel()
        } else {
            let display = match &self.results_region {
                Some(region) => {
                    let visible = if self.include_sources {
                        region.clone()
                    } else {
                        fragment::without_region(region, SOURCES_REGION_ID)
                    };
                    fragment::html_to_text(&visible)
                }
                None => "Submit a query to see results here.".to_string(),
            };
            scrollable(
                container(text(display).size(14))
                    .padding(10)
                    .width(Length::Fill),
            )
            .height(Length::Fill)
            .into()
        };

        column![query_input, options, actions, output]
            .spacing(10)
            .width(Length::Fill)
            .into()
    }

    fn examples_panel(&self) -> Element<Message> {
        if self.examples_loading {
            return container(text("Loading examples...").size(14))
                .padding(10)
                .into();
        }
        if self.examples_failed {
            return container(text("Could not load examples. Try again later.").size(14))
                .padding(10)
                .into();
        }
        let Some(examples) = &self.examples else {
            return container(text("No examples available.").size(14))
                .padding(10)
                .into();
        };

        let mut list = column![].spacing(6);
        for (category, entries) in submit::group_examples(examples) {
            list = list.push(text(category).size(15));
            for example in entries {
                let label = column![
                    text(example.title.clone()).size(13),
                    text(example.query.clone()).size(11),
                ]
                .spacing(2);
                list = list.push(
                    button(label)
                        .on_press(Message::UseExample(example.query.clone()))
                        .width(Length::Fill),
                );
            }
        }
        scrollable(container(list).padding(10).width(Length::Fill))
            .height(Length::Fill)
            .into()
    }

    fn history_panel(&self) -> Element<Message> {
        let mut messages = column![].spacing(8);
        if self.history.is_empty() {
            messages = messages.push(text("No messages yet").size(12));
        }
        for message in &self.history {
            let who = if message.role == "user" {
                "You"
            } else {
                "Assistant"
            };
            let body = fragment::html_to_text(&markdown::render(&message.content));
            messages = messages.push(column![text(who).size(11), text(body).size(13)].spacing(2));
        }

        let send_enabled =
            !self.sending && self.current_chat.is_some() && !self.message_input.trim().is_empty();
        let composer = row![
            text_input("Message...", &self.message_input)
                .on_input(Message::MessageInputChanged)
                .on_submit(Message::SendMessage)
                .padding(8)
                .size(13),
            button(text("Send").size(13))
                .on_press_maybe(send_enabled.then_some(Message::SendMessage)),
        ]
        .spacing(6);

        container(column![scrollable(messages).height(Length::Fill), composer].spacing(8))
            .width(Length::Fixed(300.0))
            .into()
    }

    fn theme(&self) -> Theme {
        Theme::TokyoNight
    }
}

/// Session loop: one read/send/parse/confirm/execute/report cycle per input line.
///
/// The conversation lives only in memory. Action results are fed back as a user
/// message so the model can react to failures and refusals on its next reply.
use anyhow::Result;
use tracing::{debug, info, warn};

use crate::client::{ChatProvider, Message, Role};
use crate::executor::{ActionResult, ActionStatus, Executor};
use crate::gate::{self, SessionPolicy};
use crate::models::{self, ModelSelection};
use crate::plan::{self, Plan, Reply};
use crate::ui::{self, Frontend, Tone};

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are Sidekick, an expert software developer agent. Your goal is to help the user with their coding tasks by generating, editing, and testing files in the current project directory.

To act on the project, respond with a JSON object inside a ```json fenced block containing a list of actions to perform. Each action is an object with a "command" key.

The available commands are:
1. "create_file": Creates a new file. Requires "path" and "content".
2. "edit_file": Changes an existing file. Requires "path" and EITHER "content" (the complete new file) OR "diff" (a unified diff with @@ hunks).
3. "test": Runs a validation command in the shell. Requires "test_command". Optional "timeout_secs" (default 30). The command should be simple and directly test the code you just wrote.

Paths are relative to the project root. Files outside the project cannot be written.
The user confirms each action. After the actions run you will receive their results, including test output; use them to fix problems in your next plan.

If the user's request is not a coding task (a question, a poem), respond with a plain text answer without any JSON.

Example user request: "Create a python script that prints the 10th fibonacci number."
Your response:
```json
{
  "actions": [
    {
      "command": "create_file",
      "path": "fibonacci.py",
      "content": "def fib(n):\n    a, b = 0, 1\n    for _ in range(n):\n        a, b = b, a + b\n    return a\n\nprint(fib(10))\n"
    },
    {
      "command": "test",
      "test_command": "python fibonacci.py"
    }
  ]
}
```"#;

const HELP: &str = "\
Available commands:
  /help           - Show this help message.
  /model [id]     - Change the active AI model.
  /llm_server     - Change the LLM server API URL for this session.
  /system_prompt  - View and replace the system prompt for this session.
  /exit, /quit    - Exit the application.

Anything else is sent to the model. Proposed actions are confirmed one by one:
answer y to run it, n (or Enter) to skip it, always to stop asking for this session.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Session<P: ChatProvider, F: Frontend> {
    provider: P,
    ui: F,
    executor: Executor,
    model: ModelSelection,
    policy: SessionPolicy,
    history: Vec<Message>,
    system_prompt: String,
    verbose: bool,
}

impl<P: ChatProvider, F: Frontend> Session<P, F> {
    pub fn new(provider: P, ui: F, executor: Executor, model: String, system_prompt: String) -> Self {
        Self {
            provider,
            ui,
            executor,
            model: ModelSelection::new(model),
            policy: SessionPolicy::default(),
            history: Vec::new(),
            system_prompt,
            verbose: false,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn model(&self) -> &str {
        self.model.current()
    }

    /// Read lines until `/exit`, `/quit` or end of input.
    pub async fn run(&mut self) -> Result<()> {
        self.ui.show(
            Tone::System,
            &format!("Welcome to Sidekick! Using model: {}", self.model.current()),
        );
        self.ui.show(Tone::System, "Type /help for a list of commands.");
        if self.executor.is_dry_run() {
            self.ui.show(Tone::Muted, "Dry run: actions are shown but never executed.");
        }

        loop {
            let Some(line) = self.ui.read_line("sidekick prompt > ")? else {
                break;
            };
            if self.handle_line(&line).await? == Flow::Exit {
                break;
            }
        }
        self.ui.show(Tone::System, "Goodbye!");
        Ok(())
    }

    pub async fn handle_line(&mut self, line: &str) -> Result<Flow> {
        let input = line.trim();
        if input.is_empty() {
            return Ok(Flow::Continue);
        }
        if input.starts_with('/') {
            return self.command(input).await;
        }
        self.turn(input).await?;
        Ok(Flow::Continue)
    }

    // ── Slash commands ────────────────────────────────────────────────────────

    async fn command(&mut self, input: &str) -> Result<Flow> {
        let (name, arg) = match input.split_once(char::is_whitespace) {
            Some((n, a)) => (n, Some(a.trim()).filter(|a| !a.is_empty())),
            None => (input, None),
        };

        match name.to_ascii_lowercase().as_str() {
            "/exit" | "/quit" => return Ok(Flow::Exit),
            "/help" => self.ui.show(Tone::Chat, HELP),
            "/model" => {
                models::switch_model(&self.provider, &mut self.ui, &mut self.model, arg).await?;
            }
            "/llm_server" => self.change_server(arg)?,
            "/system_prompt" => self.edit_system_prompt()?,
            other => self.ui.show(
                Tone::Error,
                &format!("Unknown command {other}. Type /help for a list of commands."),
            ),
        }
        Ok(Flow::Continue)
    }

    fn change_server(&mut self, arg: Option<&str>) -> Result<()> {
        let url = match arg {
            Some(a) => a.to_string(),
            None => {
                let prompt = format!(
                    "API base URL (blank to cancel) [{}]: ",
                    self.provider.base_url()
                );
                match self.ui.read_line(&prompt)? {
                    Some(l) if !l.trim().is_empty() => l.trim().to_string(),
                    _ => {
                        self.ui.show(Tone::System, "LLM server URL update canceled.");
                        return Ok(());
                    }
                }
            }
        };
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            self.ui.show(Tone::Error, &format!("Not an http(s) URL: {url}"));
            return Ok(());
        }
        info!(%url, "provider base URL changed");
        self.provider.set_base_url(url);
        self.ui.show(
            Tone::Success,
            &format!("LLM server URL updated to: {}", self.provider.base_url()),
        );
        Ok(())
    }

    fn edit_system_prompt(&mut self) -> Result<()> {
        self.ui.show(Tone::System, "Current system prompt:");
        self.ui.show(Tone::Muted, &self.system_prompt);
        let edited = self.ui.read_block(
            "Enter the new system prompt. Finish with a line containing only '.'; an empty prompt cancels.",
        )?;
        match edited {
            Some(p) if !p.trim().is_empty() => {
                self.system_prompt = p;
                self.ui.show(Tone::Success, "System prompt updated for this session.");
            }
            _ => self.ui.show(Tone::System, "System prompt update canceled."),
        }
        Ok(())
    }

    // ── Conversation turn ─────────────────────────────────────────────────────

    pub async fn turn(&mut self, input: &str) -> Result<()> {
        let checkpoint = (self.history.len(), self.history.last().cloned());
        self.push_user(input);

        self.ui.begin_wait("Thinking...");
        let response = self
            .provider
            .chat(self.model.current(), &self.system_prompt, &self.history)
            .await;
        self.ui.end_wait();

        let completion = match response {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "chat request failed");
                // Drop the unanswered input so a retry doesn't send it twice
                let (len, last) = checkpoint;
                self.history.truncate(len);
                if let (Some(slot), Some(prev)) = (self.history.last_mut(), last) {
                    *slot = prev;
                }
                self.ui.show(Tone::Error, &format!("An error occurred: {e}"));
                return Ok(());
            }
        };

        if self.verbose {
            self.ui.show(
                Tone::Muted,
                &format!("  in {} out {}", completion.input_tokens, completion.output_tokens),
            );
        }
        self.history.push(Message::assistant(completion.text.clone()));

        match plan::parse_reply(&completion.text) {
            Ok(Reply::Chat(text)) => {
                let text = if text.is_empty() { "(empty reply)" } else { text.as_str() };
                self.ui.show(Tone::Chat, &format!("\n🤖 Sidekick:\n{text}"));
            }
            Ok(Reply::Plan(plan)) => self.run_plan(plan).await?,
            Err(e) if e.is_validation() => {
                warn!(error = %e, "plan rejected");
                self.ui.show(Tone::Error, &format!("\nRejected the proposed plan: {e}"));
                self.ui.show(Tone::Muted, &completion.text);
                self.push_user(&format!(
                    "Your plan was rejected and nothing was executed: {e}. \
                     Send a corrected plan using only create_file, edit_file and test."
                ));
            }
            Err(e) => {
                debug!(error = %e, "reply is not a valid plan, showing as chat");
                self.ui.show(Tone::Chat, &format!("\n🤖 Sidekick:\n{}", completion.text));
            }
        }
        Ok(())
    }

    async fn run_plan(&mut self, plan: Plan) -> Result<()> {
        let total = plan.actions.len();
        info!(actions = total, "plan received");

        if !plan.explanation.is_empty() {
            self.ui.show(Tone::Chat, &format!("\n🤖 Sidekick:\n{}", plan.explanation));
        }
        self.ui.show(
            Tone::Plan,
            &format!("\n🤖 Sidekick has proposed {total} action{}:", if total == 1 { "" } else { "s" }),
        );
        for (i, action) in plan.actions.iter().enumerate() {
            self.ui.show(
                Tone::Plan,
                &format!("  {}. {} {}", i + 1, ui::action_glyph(action.kind()), action.summary()),
            );
        }

        let mut results: Vec<ActionResult> = Vec::with_capacity(total);
        for (i, action) in plan.actions.iter().enumerate() {
            self.ui.show(Tone::Plan, &format!("\n[{}/{total}] {}", i + 1, action.summary()));
            let preview = self.executor.preview(action);

            let result = if self.executor.is_dry_run() {
                self.ui.show(Tone::Muted, &preview);
                self.executor.execute(action).await
            } else if gate::decide(&mut self.policy, action, &preview, &mut self.ui)?.is_approved() {
                self.executor.execute(action).await
            } else {
                ActionResult::skipped(action, "denied by user")
            };

            self.render_result(&result);
            results.push(result);
        }

        let done = results.iter().filter(|r| r.status == ActionStatus::Done).count();
        let failed = results.iter().filter(|r| r.status == ActionStatus::Failed).count();
        let skipped = total - done - failed;
        self.ui.show(
            Tone::System,
            &format!("\n{done} done · {failed} failed · {skipped} not performed"),
        );

        self.push_user(&summarize(&results));
        Ok(())
    }

    fn render_result(&mut self, result: &ActionResult) {
        let (tone, mark) = match result.status {
            ActionStatus::Done => (Tone::Success, "✅"),
            ActionStatus::Failed => (Tone::Error, "❌"),
            ActionStatus::Skipped => (Tone::Muted, "⏭"),
        };
        let mut lines = result.detail.lines();
        let first = lines.next().unwrap_or("");
        self.ui.show(tone, &format!("{mark} {first}"));
        let rest: Vec<&str> = lines.collect();
        if !rest.is_empty() {
            self.ui.show(Tone::Test, &rest.join("\n"));
        }
    }

    /// Append user-side text, merging into a trailing user message so roles keep
    /// alternating (strict chat templates reject two user turns in a row).
    fn push_user(&mut self, text: &str) {
        match self.history.last_mut() {
            Some(last) if last.role == Role::User => {
                last.content.push_str("\n\n");
                last.content.push_str(text);
            }
            _ => self.history.push(Message::user(text)),
        }
    }
}

/// The message fed back to the model after a plan ran.
fn summarize(results: &[ActionResult]) -> String {
    let mut out = String::from("Results of the proposed actions:");
    for (i, r) in results.iter().enumerate() {
        out.push('\n');
        out.push_str(&r.feedback(i));
    }
    out
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use tempfile::TempDir;

    use super::*;
    use crate::client::Completion;
    use crate::error::ClientError;
    use crate::gate::{Answer, Prompter};
    use crate::plan::Action;

    // ── Scripted collaborators ────────────────────────────────────────────────

    #[derive(Default)]
    struct FakeProvider {
        replies: RefCell<VecDeque<Result<String, ClientError>>>,
        /// (model, messages) per chat request
        requests: RefCell<Vec<(String, Vec<Message>)>>,
        models: Vec<String>,
        base: String,
    }

    impl FakeProvider {
        fn replying(replies: &[&str]) -> Self {
            Self {
                replies: RefCell::new(replies.iter().map(|r| Ok(r.to_string())).collect()),
                models: vec!["model-a".to_string(), "model-b".to_string()],
                base: "http://localhost:1234/v1".to_string(),
                ..Default::default()
            }
        }
    }

    impl ChatProvider for FakeProvider {
        async fn chat(
            &self,
            model: &str,
            _system: &str,
            messages: &[Message],
        ) -> Result<Completion, ClientError> {
            self.requests.borrow_mut().push((model.to_string(), messages.to_vec()));
            let next = self
                .replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok("ok".to_string()));
            next.map(|text| Completion { text, ..Default::default() })
        }

        async fn list_models(&self) -> Result<Vec<String>, ClientError> {
            Ok(self.models.clone())
        }

        fn base_url(&self) -> &str {
            &self.base
        }

        fn set_base_url(&mut self, url: String) {
            self.base = url;
        }
    }

    #[derive(Default)]
    struct FakeUi {
        lines: VecDeque<String>,
        answers: VecDeque<String>,
        shown: Vec<(Tone, String)>,
        confirmations: usize,
    }

    impl FakeUi {
        fn answering(answers: &[&str]) -> Self {
            Self {
                answers: answers.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        fn saw(&self, needle: &str) -> bool {
            self.shown.iter().any(|(_, t)| t.contains(needle))
        }
    }

    impl Prompter for FakeUi {
        fn confirm(&mut self, _action: &Action, _preview: &str) -> Result<Option<Answer>> {
            self.confirmations += 1;
            Ok(self.answers.pop_front().map(|a| Answer::parse(&a)))
        }
    }

    impl Frontend for FakeUi {
        fn show(&mut self, tone: Tone, text: &str) {
            self.shown.push((tone, text.to_string()));
        }

        fn read_line(&mut self, _prompt: &str) -> Result<Option<String>> {
            Ok(self.lines.pop_front())
        }
    }

    fn session(
        dir: &TempDir,
        provider: FakeProvider,
        ui: FakeUi,
    ) -> Session<FakeProvider, FakeUi> {
        let executor = Executor::new(dir.path(), 5).unwrap();
        Session::new(provider, ui, executor, "model-a".to_string(), "sys".to_string())
    }

    fn fenced(json: &str) -> String {
        format!("Here is the plan.\n```json\n{json}\n```")
    }

    // ── Tests ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_chat_reply_is_displayed_without_actions() {
        let dir = TempDir::new().unwrap();
        let provider = FakeProvider::replying(&["Rust is a systems language."]);
        let mut s = session(&dir, provider, FakeUi::default());

        s.handle_line("what is rust?").await.unwrap();

        assert!(s.ui.saw("Rust is a systems language."));
        assert_eq!(s.ui.confirmations, 0);
        assert_eq!(s.history().len(), 2);
        assert_eq!(s.history()[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_malformed_json_shown_verbatim_and_nothing_runs() {
        let dir = TempDir::new().unwrap();
        let raw = "```json\n{\"actions\": [{\"command\": \"create_file\", \"path\": \"x.txt\",\n```";
        let mut s = session(&dir, FakeProvider::replying(&[raw]), FakeUi::answering(&["y"]));

        s.handle_line("make x").await.unwrap();

        assert!(s.ui.saw(raw));
        assert_eq!(s.ui.confirmations, 0);
        assert!(!dir.path().join("x.txt").exists());
    }

    #[tokio::test]
    async fn test_plan_runs_in_order_and_feeds_results_back() {
        let dir = TempDir::new().unwrap();
        let reply = fenced(
            r#"{"actions": [
                {"command": "create_file", "path": "step.txt", "content": "one\n"},
                {"command": "test", "test_command": "cat step.txt && echo two >> step.txt"},
                {"command": "test", "test_command": "cat step.txt"}
            ]}"#,
        );
        let mut s = session(&dir, FakeProvider::replying(&[reply.as_str()]), FakeUi::answering(&["y", "y", "y"]));

        s.handle_line("do it").await.unwrap();

        assert_eq!(s.ui.confirmations, 3);
        assert_eq!(std::fs::read_to_string(dir.path().join("step.txt")).unwrap(), "one\ntwo\n");
        let feedback = &s.history().last().unwrap();
        assert_eq!(feedback.role, Role::User);
        assert!(feedback.content.starts_with("Results of the proposed actions:"));
        let first = feedback.content.find("1. create_file").unwrap();
        let third = feedback.content.find("3. test").unwrap();
        assert!(first < third);
        assert!(feedback.content.contains("one\ntwo"));
    }

    #[tokio::test]
    async fn test_denied_action_has_no_side_effect() {
        let dir = TempDir::new().unwrap();
        let reply = fenced(
            r#"[{"command": "create_file", "path": "denied.txt", "content": "x"},
                {"command": "create_file", "path": "allowed.txt", "content": "y"}]"#,
        );
        let mut s = session(&dir, FakeProvider::replying(&[reply.as_str()]), FakeUi::answering(&["n", "y"]));

        s.handle_line("two files").await.unwrap();

        assert!(!dir.path().join("denied.txt").exists());
        assert!(dir.path().join("allowed.txt").exists());
        let feedback = &s.history().last().unwrap().content;
        assert!(feedback.contains("create_file denied.txt (1 lines) — not performed"));
    }

    #[tokio::test]
    async fn test_always_allow_stops_prompting_for_the_session() {
        let dir = TempDir::new().unwrap();
        let first = fenced(
            r#"[{"command": "create_file", "path": "a.txt", "content": "a"},
                {"command": "create_file", "path": "b.txt", "content": "b"}]"#,
        );
        let second = fenced(r#"{"command": "edit_file", "path": "a.txt", "content": "A"}"#);
        let mut s = session(
            &dir,
            FakeProvider::replying(&[first.as_str(), second.as_str()]),
            FakeUi::answering(&["always"]),
        );

        s.handle_line("first").await.unwrap();
        s.handle_line("second").await.unwrap();

        assert_eq!(s.ui.confirmations, 1);
        assert!(dir.path().join("b.txt").exists());
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "A");
    }

    #[tokio::test]
    async fn test_write_outside_root_is_refused_even_when_approved() {
        let dir = TempDir::new().unwrap();
        let reply = fenced(r#"[{"command": "create_file", "path": "../outside-sidekick.txt", "content": "x"}]"#);
        let mut s = session(&dir, FakeProvider::replying(&[reply.as_str()]), FakeUi::answering(&["y"]));

        s.handle_line("escape").await.unwrap();

        assert!(!dir.path().parent().unwrap().join("outside-sidekick.txt").exists());
        assert!(s.history().last().unwrap().content.contains("FAILED"));
    }

    #[tokio::test]
    async fn test_test_timeout_does_not_end_session() {
        let dir = TempDir::new().unwrap();
        let slow = fenced(r#"[{"command": "test", "test_command": "sleep 5", "timeout_secs": 1}]"#);
        let mut s = session(
            &dir,
            FakeProvider::replying(&[slow.as_str(), "still here"]),
            FakeUi::answering(&["y"]),
        );

        assert_eq!(s.handle_line("slow test").await.unwrap(), Flow::Continue);
        assert!(s.history().last().unwrap().content.contains("timed out after 1s"));

        s.handle_line("hello?").await.unwrap();
        assert!(s.ui.saw("still here"));
    }

    #[tokio::test]
    async fn test_invalid_plan_rejected_whole_and_reported_to_model() {
        let dir = TempDir::new().unwrap();
        let reply = fenced(
            r#"[{"command": "create_file", "path": "ok.txt", "content": "x"},
                {"command": "rm_rf", "path": "/"}]"#,
        );
        let mut s = session(&dir, FakeProvider::replying(&[reply.as_str()]), FakeUi::answering(&["y"]));

        s.handle_line("go").await.unwrap();

        assert_eq!(s.ui.confirmations, 0);
        assert!(!dir.path().join("ok.txt").exists());
        let last = s.history().last().unwrap();
        assert_eq!(last.role, Role::User);
        assert!(last.content.contains("rejected"));
        assert!(last.content.contains("rm_rf"));
    }

    #[tokio::test]
    async fn test_model_switch_only_affects_later_requests() {
        let dir = TempDir::new().unwrap();
        let mut ui = FakeUi::default();
        ui.lines.push_back("2".to_string());
        let mut s = session(&dir, FakeProvider::replying(&["first", "second"]), ui);

        s.handle_line("hello").await.unwrap();
        let before: Vec<Message> = s.history().to_vec();
        s.handle_line("/model").await.unwrap();
        assert_eq!(s.model(), "model-b");
        assert_eq!(s.history(), before.as_slice());

        s.handle_line("again").await.unwrap();
        let requests = s.provider.requests.borrow();
        assert_eq!(requests[0].0, "model-a");
        assert_eq!(requests[1].0, "model-b");
        assert_eq!(requests[1].1[..2], before[..]);
    }

    #[tokio::test]
    async fn test_model_direct_selection_rejects_unknown_id() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir, FakeProvider::replying(&[]), FakeUi::default());

        s.handle_line("/model gpt-99").await.unwrap();
        assert_eq!(s.model(), "model-a");
        s.handle_line("/MODEL model-b").await.unwrap();
        assert_eq!(s.model(), "model-b");
    }

    #[tokio::test]
    async fn test_connectivity_error_is_reported_and_history_restored() {
        let dir = TempDir::new().unwrap();
        let provider = FakeProvider::replying(&[]);
        provider
            .replies
            .borrow_mut()
            .push_back(Err(ClientError::Decode("connection refused".to_string())));
        let mut s = session(&dir, provider, FakeUi::default());

        assert_eq!(s.handle_line("hi").await.unwrap(), Flow::Continue);
        assert!(s.ui.saw("connection refused"));
        assert!(s.history().is_empty());

        s.handle_line("hi").await.unwrap();
        assert_eq!(s.history().len(), 2);
    }

    #[tokio::test]
    async fn test_feedback_merges_with_next_user_message() {
        let dir = TempDir::new().unwrap();
        let reply = fenced(r#"[{"command": "test", "test_command": "true"}]"#);
        let mut s = session(&dir, FakeProvider::replying(&[reply.as_str(), "fine"]), FakeUi::answering(&["y"]));

        s.handle_line("check").await.unwrap();
        s.handle_line("and now?").await.unwrap();

        let roles: Vec<Role> = s.history().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
        assert!(s.history()[2].content.ends_with("and now?"));
    }

    #[tokio::test]
    async fn test_slash_commands_never_reach_provider() {
        let dir = TempDir::new().unwrap();
        let mut s = session(&dir, FakeProvider::replying(&[]), FakeUi::default());

        assert_eq!(s.handle_line("/help").await.unwrap(), Flow::Continue);
        assert_eq!(s.handle_line("/bogus").await.unwrap(), Flow::Continue);
        assert_eq!(s.handle_line("   ").await.unwrap(), Flow::Continue);
        assert_eq!(s.handle_line("/QUIT").await.unwrap(), Flow::Exit);
        assert_eq!(s.handle_line("/exit").await.unwrap(), Flow::Exit);

        assert!(s.provider.requests.borrow().is_empty());
        assert!(s.ui.saw("Unknown command /bogus"));
    }

    #[tokio::test]
    async fn test_llm_server_and_system_prompt_commands() {
        let dir = TempDir::new().unwrap();
        let mut ui = FakeUi::default();
        for line in ["Be terse.", "Always.", "."] {
            ui.lines.push_back(line.to_string());
        }
        let mut s = session(&dir, FakeProvider::replying(&[]), ui);

        s.handle_line("/llm_server ftp://nope").await.unwrap();
        assert_eq!(s.provider.base_url(), "http://localhost:1234/v1");
        s.handle_line("/llm_server http://10.0.0.2:8080/v1").await.unwrap();
        assert_eq!(s.provider.base_url(), "http://10.0.0.2:8080/v1");

        s.handle_line("/system_prompt").await.unwrap();
        assert_eq!(s.system_prompt, "Be terse.\nAlways.");
    }

    #[tokio::test]
    async fn test_run_exits_on_end_of_input() {
        let dir = TempDir::new().unwrap();
        let mut ui = FakeUi::default();
        ui.lines.push_back("hello".to_string());
        let mut s = session(&dir, FakeProvider::replying(&["hi there"]), ui);

        s.run().await.unwrap();

        assert!(s.ui.saw("Welcome to Sidekick! Using model: model-a"));
        assert!(s.ui.saw("hi there"));
        assert!(s.ui.saw("Goodbye!"));
    }

    #[tokio::test]
    async fn test_dry_run_skips_gate_and_effects() {
        let dir = TempDir::new().unwrap();
        let reply = fenced(r#"[{"command": "create_file", "path": "dry.txt", "content": "x"}]"#);
        let executor = Executor::new(dir.path(), 5).unwrap().with_dry_run(true);
        let mut s = Session::new(
            FakeProvider::replying(&[reply.as_str()]),
            FakeUi::default(),
            executor,
            "model-a".to_string(),
            "sys".to_string(),
        );

        s.handle_line("dry").await.unwrap();

        assert_eq!(s.ui.confirmations, 0);
        assert!(!dir.path().join("dry.txt").exists());
        assert!(s.history().last().unwrap().content.contains("not performed"));
    }
}

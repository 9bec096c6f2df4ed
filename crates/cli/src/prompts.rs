//! Prompts answered on the terminal.
//!
//! Questions go to stderr so stdout stays reserved for the run result. End of input
//! declines the prompt. With `--yes` every prompt takes its default without reading.

use std::io::Write;

use async_trait::async_trait;
use stepline_engine::PromptCallbacks;
use stepline_types::{DialogPrompt, DialogResult, DiffPrompt, DriveFileSelection, PromptPayload, PromptRequest, ValuePrompt};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin},
    sync::Mutex,
};

pub struct TerminalPrompts<R> {
    input: Mutex<Lines<R>>,
    auto_accept: bool,
}

impl TerminalPrompts<BufReader<Stdin>> {
    pub fn stdin(auto_accept: bool) -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), auto_accept)
    }
}

impl<R> TerminalPrompts<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R, auto_accept: bool) -> Self {
        Self {
            input: Mutex::new(reader.lines()),
            auto_accept,
        }
    }

    async fn ask(&self, question: &str) -> Option<String> {
        eprint!("{question} ");
        let _ = std::io::stderr().flush();
        self.input.lock().await.next_line().await.ok().flatten()
    }

    /// Reads lines until a lone `.`.
    async fn ask_multiline(&self, question: &str) -> Option<String> {
        eprintln!("{question} (finish with a line containing only '.')");
        let mut input = self.input.lock().await;
        let mut lines = Vec::new();
        loop {
            match input.next_line().await.ok().flatten() {
                Some(line) if line == "." => break,
                Some(line) => lines.push(line),
                None if lines.is_empty() => return None,
                None => break,
            }
        }
        Some(lines.join("\n"))
    }

    async fn value(&self, request: &PromptRequest, prompt: &ValuePrompt) -> Option<String> {
        let default = prompt.default_value.clone().unwrap_or_default();
        if self.auto_accept {
            return Some(default);
        }
        eprintln!("[{}] {}", request.node_id, prompt.title);
        if prompt.multiline {
            return self.ask_multiline(">").await;
        }
        let question = if default.is_empty() { ">".to_string() } else { format!("[{default}] >") };
        let line = self.ask(&question).await?;
        Some(if line.is_empty() { default } else { line })
    }

    async fn dialog(&self, request: &PromptRequest, prompt: &DialogPrompt) -> Option<String> {
        let mut result = DialogResult {
            button: prompt.button1.clone(),
            selected: prompt.default_selected.clone(),
            input: prompt.default_input.clone().unwrap_or_default(),
        };

        eprintln!("[{}] {}", request.node_id, prompt.title);
        if !prompt.message.is_empty() {
            eprintln!("{}", prompt.message);
        }
        if !self.auto_accept {
            if !prompt.options.is_empty() {
                for (position, option) in prompt.options.iter().enumerate() {
                    eprintln!("  {}) {option}", position + 1);
                }
                let line = self.ask("Select (numbers, comma separated):").await?;
                if !line.trim().is_empty() {
                    result.selected = pick_options(&prompt.options, &line, prompt.multi_select);
                }
            }
            if let Some(input_title) = &prompt.input_title {
                let line = if prompt.multiline {
                    self.ask_multiline(input_title).await?
                } else {
                    self.ask(&format!("{input_title}:")).await?
                };
                if !line.is_empty() {
                    result.input = line;
                }
            }
            if let Some(button2) = &prompt.button2 {
                let line = self.ask(&format!("[{}/{}] (Enter = {}):", prompt.button1, button2, prompt.button1)).await?;
                let answer = line.trim();
                if answer == "2" || answer.eq_ignore_ascii_case(button2) {
                    result.button = button2.clone();
                }
            }
        }
        serde_json::to_string(&result).ok()
    }

    async fn diff(&self, prompt: &DiffPrompt) -> Option<String> {
        eprintln!("--- {}", prompt.path);
        for line in changed_lines(&prompt.original, &prompt.proposed) {
            eprintln!("{line}");
        }
        if self.auto_accept {
            return Some("true".into());
        }
        let line = self.ask("Apply changes? [y/N]").await?;
        let accepted = matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes");
        Some(accepted.to_string())
    }
}

#[async_trait]
impl<R> PromptCallbacks for TerminalPrompts<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn prompt_for_value(&self, request: &PromptRequest) -> Option<String> {
        match &request.payload {
            PromptPayload::Value(prompt) => self.value(request, prompt).await,
            _ => None,
        }
    }

    async fn prompt_for_dialog(&self, request: &PromptRequest) -> Option<String> {
        match &request.payload {
            PromptPayload::Dialog(prompt) => self.dialog(request, prompt).await,
            _ => None,
        }
    }

    async fn prompt_for_drive_file(&self, request: &PromptRequest) -> Option<String> {
        let PromptPayload::DriveFile(prompt) = &request.payload else {
            return None;
        };
        if self.auto_accept {
            return None;
        }
        let filter = if prompt.extensions.is_empty() { String::new() } else { format!(" ({})", prompt.extensions.join(", ")) };
        eprintln!("[{}] {}{filter}", request.node_id, prompt.title);
        let path = self.ask("Path:").await?;
        let path = path.trim();
        if path.is_empty() {
            return None;
        }
        let selection = DriveFileSelection {
            id: path.to_string(),
            path: path.to_string(),
        };
        serde_json::to_string(&selection).ok()
    }

    async fn prompt_for_diff(&self, request: &PromptRequest) -> Option<String> {
        match &request.payload {
            PromptPayload::Diff(prompt) => self.diff(prompt).await,
            _ => None,
        }
    }

    async fn prompt_for_password(&self, request: &PromptRequest) -> Option<String> {
        let PromptPayload::Password(prompt) = &request.payload else {
            return None;
        };
        if self.auto_accept {
            return None;
        }
        eprintln!("[{}] {}", request.node_id, prompt.title);
        let password = self.ask(&format!("Password for {}:", prompt.path)).await?;
        (!password.is_empty()).then_some(password)
    }
}

fn pick_options(options: &[String], line: &str, multi_select: bool) -> Vec<String> {
    let picked = line
        .split(',')
        .filter_map(|item| item.trim().parse::<usize>().ok())
        .filter_map(|number| number.checked_sub(1).and_then(|index| options.get(index)))
        .cloned();
    if multi_select { picked.collect() } else { picked.take(1).collect() }
}

/// Lines between the common prefix and suffix, marked `-` and `+`.
fn changed_lines(original: &str, proposed: &str) -> Vec<String> {
    let before: Vec<&str> = original.lines().collect();
    let after: Vec<&str> = proposed.lines().collect();
    let prefix = before.iter().zip(&after).take_while(|(left, right)| left == right).count();
    let suffix = before[prefix..]
        .iter()
        .rev()
        .zip(after[prefix..].iter().rev())
        .take_while(|(left, right)| left == right)
        .count();

    let removed = before[prefix..before.len() - suffix].iter().map(|line| format!("-{line}"));
    let added = after[prefix..after.len() - suffix].iter().map(|line| format!("+{line}"));
    removed.chain(added).collect()
}

#[cfg(test)]
mod tests {
    use stepline_types::{DriveFilePrompt, PasswordPrompt};

    use super::*;

    fn scripted(input: &'static str, auto_accept: bool) -> TerminalPrompts<BufReader<&'static [u8]>> {
        TerminalPrompts::new(BufReader::new(input.as_bytes()), auto_accept)
    }

    fn request(payload: PromptPayload) -> PromptRequest {
        PromptRequest {
            id: "p-1".into(),
            execution_id: "run-1".into(),
            node_id: "ask".into(),
            payload,
        }
    }

    #[tokio::test]
    async fn value_prompt_uses_default_on_empty_line_and_declines_on_eof() {
        let prompts = scripted("\n", false);
        let ask = request(PromptPayload::Value(ValuePrompt {
            title: "Name?".into(),
            default_value: Some("Ada".into()),
            multiline: false,
        }));
        assert_eq!(prompts.prompt_for_value(&ask).await.as_deref(), Some("Ada"));
        assert_eq!(prompts.prompt_for_value(&ask).await, None);
    }

    #[tokio::test]
    async fn dialog_reads_selection_and_button() {
        let prompts = scripted("2\nCancel\n", false);
        let ask = request(PromptPayload::Dialog(DialogPrompt {
            title: "Pick".into(),
            options: vec!["a".into(), "b".into()],
            button1: "OK".into(),
            button2: Some("Cancel".into()),
            ..DialogPrompt::default()
        }));
        let answer = prompts.prompt_for_dialog(&ask).await.expect("answer");
        assert_eq!(answer, r#"{"button":"Cancel","selected":["b"],"input":""}"#);
    }

    #[tokio::test]
    async fn auto_accept_applies_diffs_but_cannot_pick_files() {
        let prompts = scripted("", true);
        let diff = request(PromptPayload::Diff(DiffPrompt {
            path: "a.txt".into(),
            original: "old".into(),
            proposed: "new".into(),
        }));
        assert_eq!(prompts.prompt_for_diff(&diff).await.as_deref(), Some("true"));

        let pick = request(PromptPayload::DriveFile(DriveFilePrompt::default()));
        assert_eq!(prompts.prompt_for_drive_file(&pick).await, None);
        let password = request(PromptPayload::Password(PasswordPrompt::default()));
        assert_eq!(prompts.prompt_for_password(&password).await, None);
    }

    #[test]
    fn changed_lines_skip_common_context() {
        let lines = changed_lines("a\nb\nc\n", "a\nx\nc\n");
        assert_eq!(lines, vec!["-b", "+x"]);
        assert_eq!(changed_lines("same", "same"), Vec::<String>::new());
    }
}

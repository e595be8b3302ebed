use std::collections::BTreeMap;

use serde::Serialize;

/// Options set explicitly in the workspace's rc files, as echoed by
/// `bazel test --announce_rc`.
///
/// ```text
/// INFO: Reading rc options for 'test' from /ws/.bazelrc:
///   Inherited 'build' options: --javacopt=-source 8 -target 8 --stamp
///   'test' options: --explicit_java_test_deps=true --test_output=errors
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOptions {
    /// Every option regardless of command context; later lines win.
    all: BTreeMap<String, String>,
    by_context: BTreeMap<String, BTreeMap<String, String>>,
}

impl CommandOptions {
    pub fn parse<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut options = Self::default();
        for line in lines {
            options.parse_line(line);
        }
        options
    }

    fn parse_line(&mut self, line: &str) {
        let mut line = line.trim();
        if let Some(rest) = line.strip_prefix("Inherited ") {
            line = rest.trim_start();
        }
        let Some(rest) = line.strip_prefix('\'') else {
            return;
        };
        let Some((context, rest)) = rest.split_once('\'') else {
            return;
        };
        let Some(options) = rest.trim_start().strip_prefix("options:") else {
            return;
        };

        let options = options.trim();
        let options = options.strip_prefix("--").unwrap_or(options);
        for option in options.split(" --").filter(|o| !o.trim().is_empty()) {
            let option = option.trim();
            let (name, value) = option
                .split_once('=')
                .or_else(|| option.split_once(' '))
                .unwrap_or((option, "true"));
            self.all.insert(name.to_string(), value.to_string());
            self.by_context
                .entry(context.to_string())
                .or_default()
                .insert(name.to_string(), value.to_string());
        }
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.all.get(name).map(String::as_str)
    }

    pub fn contextual_option(&self, context: &str, name: &str) -> Option<&str> {
        self.by_context
            .get(context)
            .and_then(|options| options.get(name))
            .map(String::as_str)
    }

    /// `--explicit_java_test_deps`, looked up in `test` then `build` then anywhere.
    pub fn explicit_java_test_deps(&self) -> bool {
        const NAME: &str = "explicit_java_test_deps";
        self.contextual_option("test", NAME)
            .or_else(|| self.contextual_option("build", NAME))
            .or_else(|| self.option(NAME))
            .is_some_and(|value| value == "true" || value == "1")
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

//! Build-log dashboard library.
//! Parses the log and status notations, links log contexts to status nodes,
//! and projects render-ready panels that a front end can draw as-is.

pub mod core {
    use chrono::NaiveDate;
    use serde::{Deserialize, Serialize};

    use crate::path_key::PathKey;

    /// Context given to log lines written without a `context:` prefix.
    pub const NO_CONTEXT: &str = "🐱";

    /// Display name for status items whose name is empty.
    pub const PROGRESS_LABEL: &str = "进度";

    /* ------------------------------- Log ------------------------------- */

    /// Everything written under one `YYYY.MM.DD` line.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct LogGroup {
        /// Date token exactly as written in the log.
        pub date: String,
        /// Entries in the order they were written; never empty.
        pub entries: Vec<LogEntry>,
    }

    impl LogGroup {
        /// Interpret the date token as a calendar date. Tokens that match the
        /// `YYYY.MM.DD` shape but name no real day (`2024.13.40`) yield `None`.
        pub fn calendar_date(&self) -> Option<NaiveDate> {
            NaiveDate::parse_from_str(&self.date, "%Y.%m.%d").ok()
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct LogEntry {
        /// Hierarchical context (`项目:挑战杯.自动驾驶`) or [`NO_CONTEXT`].
        pub context: String,
        pub message: String,
    }

    impl LogEntry {
        pub fn has_context(&self) -> bool {
            self.context != NO_CONTEXT
        }

        pub fn context_kind(&self) -> ContextKind {
            ContextKind::of(&self.context)
        }
    }

    /// Coarse tag for a log context, used to colour context chips.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum ContextKind {
        Project,
        Task,
        Skill,
        NoContext,
        Plain,
    }

    impl ContextKind {
        /// Contexts are tagged by the first category word they mention, checked
        /// in the order 项目, 任务, 技能.
        pub fn of(context: &str) -> Self {
            if context.contains(Category::PROJECT) {
                Self::Project
            } else if context.contains(Category::TASK) {
                Self::Task
            } else if context.contains(Category::SKILL) {
                Self::Skill
            } else if context == NO_CONTEXT {
                Self::NoContext
            } else {
                Self::Plain
            }
        }
    }

    /* ------------------------------ Status ------------------------------ */

    /// One `category:name{ ... }` block from the status file.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct StatusNode {
        pub category: String,
        pub name: String,
        /// Items in declaration order.
        #[serde(default)]
        pub items: Vec<StatusItem>,
    }

    impl StatusNode {
        pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
            Self {
                category: category.into(),
                name: name.into(),
                items: vec![],
            }
        }

        /// Linking key: `category:name`, normalized.
        pub fn key(&self) -> PathKey {
            PathKey::normalize(&format!("{}:{}", self.category, self.name))
        }

        pub fn kind(&self) -> Category {
            Category::from(self.category.as_str())
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct StatusItem {
        /// May be empty; see [`StatusItem::display_name`].
        pub name: String,
        /// Raw status label such as `已完成`, `进行中` or `50%`.
        pub status: String,
    }

    impl StatusItem {
        pub fn new(name: impl Into<String>, status: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                status: status.into(),
            }
        }

        pub fn display_name(&self) -> &str {
            if self.name.is_empty() {
                PROGRESS_LABEL
            } else {
                &self.name
            }
        }
    }

    /// Closed set of block categories the dashboard knows how to rank.
    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Category {
        Project,
        Task,
        Skill,
        Other(String),
    }

    impl Category {
        pub const PROJECT: &'static str = "项目";
        pub const TASK: &'static str = "任务";
        pub const SKILL: &'static str = "技能";

        /// Display rank: projects, then tasks, then skills, then everything else.
        pub fn rank(&self) -> u8 {
            match self {
                Self::Project => 1,
                Self::Task => 2,
                Self::Skill => 3,
                Self::Other(_) => 99,
            }
        }

        pub fn label(&self) -> &str {
            match self {
                Self::Project => Self::PROJECT,
                Self::Task => Self::TASK,
                Self::Skill => Self::SKILL,
                Self::Other(label) => label,
            }
        }
    }

    impl From<&str> for Category {
        fn from(s: &str) -> Self {
            match s {
                Self::PROJECT => Self::Project,
                Self::TASK => Self::Task,
                Self::SKILL => Self::Skill,
                other => Self::Other(other.to_string()),
            }
        }
    }
}

pub mod path_key {
    //! Normalized hierarchical paths.
    //!
    //! The notations write paths with `:` and `.` interchangeably and allow stray
    //! whitespace (`项目: 挑战杯.自动驾驶`). A [`PathKey`] folds both separators to
    //! `:` and drops whitespace so paths compare segment-wise.

    use serde::Serialize;
    use std::fmt;

    pub const SEPARATOR: char = ':';

    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
    #[serde(transparent)]
    pub struct PathKey(String);

    impl PathKey {
        /// Replace every `.` with `:` and remove all whitespace. Idempotent.
        pub fn normalize(raw: &str) -> Self {
            Self(
                raw.chars()
                    .filter(|c| !c.is_whitespace())
                    .map(|c| if c == '.' { SEPARATOR } else { c })
                    .collect(),
            )
        }

        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn is_empty(&self) -> bool {
            self.0.is_empty()
        }

        /// `other` is this path or one of its descendants. Matches whole segments
        /// only: `a:b` prefixes `a:b:c` but not `a:bc`. The empty key prefixes nothing.
        pub fn is_prefix_of(&self, other: &PathKey) -> bool {
            if self.is_empty() {
                return false;
            }
            match other.0.strip_prefix(self.0.as_str()) {
                Some(rest) => rest.is_empty() || rest.starts_with(SEPARATOR),
                None => false,
            }
        }

        /// Path without its last segment; `None` for single-segment paths.
        pub fn parent(&self) -> Option<PathKey> {
            self.0
                .rfind(SEPARATOR)
                .map(|idx| Self(self.0[..idx].to_string()))
        }

        pub fn is_sibling_or_equal(&self, other: &PathKey) -> bool {
            if self.is_empty() || other.is_empty() {
                return false;
            }
            if self == other {
                return true;
            }
            match (self.parent(), other.parent()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
    }

    impl AsRef<str> for PathKey {
        fn as_ref(&self) -> &str {
            &self.0
        }
    }

    impl fmt::Display for PathKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

}

pub mod parser {
    //! Line-oriented parsers for the log and status notations.
    //!
    //! Both scans are a single forward pass over one text snapshot with all scan
    //! state held in locals. Structural lines (date headers, block headers, block
    //! closers) are recognized with `nom`; everything else is best-effort: a line
    //! that fits nowhere is dropped and traced, never reported as an error.

    use crate::core::*;
    use nom::{
        IResult,
        bytes::complete::{is_not, take_while},
        character::complete::{char, one_of},
        combinator::{all_consuming, recognize, rest},
        error::{VerboseError, VerboseErrorKind},
        sequence::tuple,
    };
    use tracing::{debug, trace};

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    const BOM: char = '\u{feff}';

    /* ------------------------ Public entry points ------------------------ */

    /// Parse log text into date groups, newest first.
    ///
    /// A date line opens a group; the previous group is kept only if at least one
    /// entry was written under it. Lines before the first date are ignored.
    pub fn parse_log_from_str(input: &str) -> Vec<LogGroup> {
        let mut groups = Vec::new();
        let mut open: Option<LogGroup> = None;

        for (lineno, line) in logical_lines(input) {
            if is_date_line(line) {
                flush_group(&mut groups, open.take());
                open = Some(LogGroup {
                    date: line.to_string(),
                    entries: vec![],
                });
                continue;
            }
            match open.as_mut() {
                Some(group) => group.entries.push(split_log_line(line)),
                None => trace!(line = lineno, "log line before first date dropped"),
            }
        }
        flush_group(&mut groups, open);

        groups.reverse();
        debug!(groups = groups.len(), "parsed log");
        groups
    }

    /// Parse status text into nodes, in declaration order.
    ///
    /// Blocks do not nest: a header seen while a block is open replaces the open
    /// block, which is lost. A block still open at end of input is lost as well.
    pub fn parse_status_from_str(input: &str) -> Vec<StatusNode> {
        let mut nodes = Vec::new();
        let mut open: Option<StatusNode> = None;

        for (lineno, line) in logical_lines(input) {
            if is_block_close(line) {
                if let Some(node) = open.take() {
                    nodes.push(node);
                }
                continue;
            }

            if let Some((category, name)) = block_header(line) {
                if let Some(lost) = open.replace(StatusNode::new(category, name)) {
                    trace!(
                        line = lineno,
                        category = %lost.category,
                        name = %lost.name,
                        "unclosed block replaced by new header"
                    );
                }
                continue;
            }

            let Some(node) = open.as_mut() else {
                trace!(line = lineno, "line outside any block dropped");
                continue;
            };
            match split_status_item(line) {
                Some(item) => node.items.push(item),
                None => trace!(line = lineno, "item line without '.' dropped"),
            }
        }

        if let Some(lost) = open {
            trace!(category = %lost.category, name = %lost.name, "unterminated block dropped");
        }
        debug!(nodes = nodes.len(), "parsed status");
        nodes
    }

    /* ------------------------------- Utils ------------------------------- */

    /// Trimmed, non-blank lines with their 1-based line numbers.
    fn logical_lines(input: &str) -> impl Iterator<Item = (usize, &str)> {
        input
            .strip_prefix(BOM)
            .unwrap_or(input)
            .lines()
            .enumerate()
            .map(|(idx, line)| (idx + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty())
    }

    fn flush_group(groups: &mut Vec<LogGroup>, group: Option<LogGroup>) {
        match group {
            Some(group) if !group.entries.is_empty() => groups.push(group),
            Some(group) => trace!(date = %group.date, "date without entries dropped"),
            None => {}
        }
    }

    /// Split at the last `:`; earlier colons belong to the context path.
    fn split_log_line(line: &str) -> LogEntry {
        match line.rsplit_once(':') {
            Some((context, message)) => LogEntry {
                context: context.trim().to_string(),
                message: message.trim().to_string(),
            },
            None => LogEntry {
                context: NO_CONTEXT.to_string(),
                message: line.to_string(),
            },
        }
    }

    /// Split at the last `.`; `name` may come out empty.
    fn split_status_item(line: &str) -> Option<StatusItem> {
        let (name, status) = line.rsplit_once('.')?;
        Some(StatusItem::new(name.trim(), status.trim()))
    }

    /* --------------------------- Line recognizers --------------------------- */

    fn is_date_line(line: &str) -> bool {
        all_consuming(date_token)(line).is_ok()
    }

    fn date_token(i: &str) -> PResult<'_, &str> {
        recognize(tuple((
            take_while_m_n(4, 4, char_is_digit),
            char('.'),
            take_while_m_n(2, 2, char_is_digit),
            char('.'),
            take_while_m_n(2, 2, char_is_digit),
        )))(i)
    }

    // Lines arrive trimmed, so a closer is exactly `}`.
    fn is_block_close(line: &str) -> bool {
        all_consuming(char::<&str, VerboseError<&str>>('}'))(line).is_ok()
    }

    /// `category(:|.)name{`, where the category holds no `:` or `.` and the
    /// name is at least one character.
    fn block_header(line: &str) -> Option<(String, String)> {
        let parsed: PResult<'_, (&str, char, &str)> =
            tuple((is_not(":."), one_of(":."), rest))(line);
        let (_, (category, _, tail)) = parsed.ok()?;
        let name = tail.strip_suffix('{')?;
        if name.is_empty() {
            return None;
        }
        Some((category.trim().to_string(), name.trim().to_string()))
    }

    fn take_while_m_n<F>(m: usize, n: usize, cond: F) -> impl Fn(&str) -> PResult<'_, &str>
    where
        F: Fn(char) -> bool + Copy,
    {
        move |i: &str| {
            let (i, out) = take_while(cond)(i)?;
            if out.len() < m || out.len() > n {
                Err(nom::Err::Error(VerboseError {
                    errors: vec![(i, VerboseErrorKind::Context("m_n"))],
                }))
            } else {
                Ok((i, out))
            }
        }
    }

    fn char_is_digit(c: char) -> bool {
        c.is_ascii_digit()
    }

}

pub mod classify {
    //! Status label classification and node verdicts.
    //!
    //! Every keyword the dashboard reacts to lives in the tables below. The log
    //! linker's status-transition and tone detection read the same tables.

    use crate::core::StatusNode;
    use serde::{Deserialize, Serialize};

    /* ---------------------------- Keyword tables ---------------------------- */

    pub const COMPLETED_LABELS: &[&str] = &["100%", "已完成"];
    pub const IN_PROGRESS_LABEL: &str = "进行中";
    /// Exact labels that mean failure.
    pub const FAILED_LABELS: &[&str] = &["失败", "无法进行"];
    /// Substrings that mean failure anywhere in a label.
    pub const FAILED_MARKERS: &[&str] = &["放弃", "失败"];

    /// Log messages containing any of these report a status change.
    pub const STATUS_VOCABULARY: &[&str] = &[
        "已完成",
        "已全部完成",
        "未开始",
        "进行中",
        "失败",
        "无法进行",
        "放弃",
        "开始",
        "重启",
        "恢复",
    ];
    pub const SUCCESS_MARKERS: &[&str] = &["已完成", "已全部完成"];
    pub const FAILURE_MARKERS: &[&str] = &["失败", "无法进行", "放弃"];
    pub const RESTART_MARKERS: &[&str] = &["开始", "重启", "恢复"];

    /* ------------------------------ Item state ------------------------------ */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(tag = "kind", content = "value", rename_all = "snake_case")]
    pub enum ItemState {
        Completed,
        Failed,
        InProgress,
        Percent(u32),
        Pending,
    }

    /// Classify a raw status label. `100%` is `Completed`; other `N%` labels are
    /// `Percent(N)`.
    pub fn classify_label(label: &str) -> ItemState {
        if COMPLETED_LABELS.contains(&label) {
            ItemState::Completed
        } else if let Some(n) = progress_percent(label) {
            ItemState::Percent(n)
        } else if label == IN_PROGRESS_LABEL {
            ItemState::InProgress
        } else if is_failure_label(label) {
            ItemState::Failed
        } else {
            ItemState::Pending
        }
    }

    /// Numeric progress of an `N%` label, `100%` included, for progress bars.
    /// Digit runs too long for `u32` saturate at `u32::MAX`.
    pub fn progress_percent(label: &str) -> Option<u32> {
        if !is_percent_label(label) {
            return None;
        }
        let digits = label.strip_suffix('%')?;
        Some(digits.parse().unwrap_or(u32::MAX))
    }

    /// One or more ASCII digits followed by `%`.
    pub fn is_percent_label(label: &str) -> bool {
        match label.strip_suffix('%') {
            Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
            None => false,
        }
    }

    fn is_failure_label(label: &str) -> bool {
        FAILED_LABELS.contains(&label) || FAILED_MARKERS.iter().any(|m| label.contains(m))
    }

    /* ----------------------------- Node verdicts ----------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum NodeVerdict {
        Completed,
        Failed,
        /// Anything else, including nodes without items.
        Open,
    }

    fn all_items_are(node: &StatusNode, state: ItemState) -> bool {
        !node.items.is_empty()
            && node
                .items
                .iter()
                .all(|item| classify_label(&item.status) == state)
    }

    pub fn is_node_completed(node: &StatusNode) -> bool {
        all_items_are(node, ItemState::Completed)
    }

    pub fn is_node_failed(node: &StatusNode) -> bool {
        all_items_are(node, ItemState::Failed)
    }

    pub fn is_node_done(node: &StatusNode) -> bool {
        is_node_completed(node) || is_node_failed(node)
    }

    pub fn node_verdict(node: &StatusNode) -> NodeVerdict {
        if is_node_completed(node) {
            NodeVerdict::Completed
        } else if is_node_failed(node) {
            NodeVerdict::Failed
        } else {
            NodeVerdict::Open
        }
    }

}

pub mod linker {
    //! Cross-references between log entries and status nodes.
    //!
    //! Two independent jobs: resolving a context string to the status node it
    //! names (click-to-navigate), and deciding whether a log entry reports a state
    //! change for the same part of the hierarchy as the entry before it.

    use crate::classify::{
        FAILURE_MARKERS, RESTART_MARKERS, STATUS_VOCABULARY, SUCCESS_MARKERS, is_percent_label,
    };
    use crate::core::{LogEntry, LogGroup, StatusNode};
    use crate::path_key::PathKey;
    use serde::{Deserialize, Serialize};
    use tracing::debug;

    /* ------------------------------ Resolution ------------------------------ */

    /// Node whose key is the longest segment-prefix of `context`.
    pub fn resolve<'a>(context: &str, nodes: &'a [StatusNode]) -> Option<&'a StatusNode> {
        resolve_index(context, nodes).and_then(|idx| nodes.get(idx))
    }

    /// Like [`resolve`], returning the index into `nodes`. Equal-length keys keep
    /// the first one in `nodes`.
    pub fn resolve_index(context: &str, nodes: &[StatusNode]) -> Option<usize> {
        let target = PathKey::normalize(context);
        let mut best: Option<(usize, usize)> = None;
        for (idx, node) in nodes.iter().enumerate() {
            let key = node.key();
            if !key.is_prefix_of(&target) {
                continue;
            }
            let len = key.as_str().len();
            if best.is_none_or(|(_, best_len)| len > best_len) {
                best = Some((idx, len));
            }
        }
        match best {
            Some((idx, _)) => debug!(%target, node = idx, "context resolved"),
            None => debug!(%target, "context matched no node"),
        }
        best.map(|(idx, _)| idx)
    }

    /* --------------------------- Status transitions --------------------------- */

    /// Connector tone for a status-update entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Tone {
        Success,
        Failure,
        Restart,
        /// A status update matching none of the above (`进行中`, `50%`).
        Neutral,
    }

    impl Tone {
        /// First matching subset wins: success, then failure, then restart.
        pub fn of(message: &str) -> Self {
            let has = |markers: &[&str]| markers.iter().any(|m| message.contains(m));
            if has(SUCCESS_MARKERS) {
                Self::Success
            } else if has(FAILURE_MARKERS) {
                Self::Failure
            } else if has(RESTART_MARKERS) {
                Self::Restart
            } else {
                Self::Neutral
            }
        }

        pub fn label(self) -> &'static str {
            match self {
                Self::Success => "success",
                Self::Failure => "failure",
                Self::Restart => "restart",
                Self::Neutral => "neutral",
            }
        }
    }

    pub fn is_status_message(message: &str) -> bool {
        STATUS_VOCABULARY.iter().any(|k| message.contains(k)) || is_percent_label(message)
    }

    /// Equal after normalization, one prefixes the other, or same parent.
    pub fn are_contexts_related(last: Option<&str>, current: &str) -> bool {
        let Some(last) = last else {
            return false;
        };
        let a = PathKey::normalize(last);
        let b = PathKey::normalize(current);
        a.is_prefix_of(&b) || b.is_prefix_of(&a) || a.is_sibling_or_equal(&b)
    }

    /// Running state for one left-to-right pass over a group's entries.
    #[derive(Debug, Clone, Default)]
    pub struct TransitionTracker {
        last_context: Option<String>,
    }

    impl TransitionTracker {
        pub fn new() -> Self {
            Self::default()
        }

        /// `Some(tone)` when `entry` is a status update for the previous context.
        /// The tracked context advances to `entry`'s either way.
        pub fn observe(&mut self, entry: &LogEntry) -> Option<Tone> {
            let update = is_status_message(&entry.message)
                && are_contexts_related(self.last_context.as_deref(), &entry.context);
            self.last_context = Some(entry.context.clone());
            update.then(|| Tone::of(&entry.message))
        }
    }

    /// Transition verdict for each entry of `group`, in entry order.
    pub fn annotate_group(group: &LogGroup) -> Vec<Option<Tone>> {
        group
            .entries
            .iter()
            .scan(TransitionTracker::new(), |tracker, entry| {
                Some(tracker.observe(entry))
            })
            .collect()
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::NO_CONTEXT;

        fn entry(context: &str, message: &str) -> LogEntry {
            LogEntry {
                context: context.into(),
                message: message.into(),
            }
        }

        #[test]
        fn resolve_prefers_longest_key() {
            let nodes = vec![
                StatusNode::new("项目", "挑战杯"),
                StatusNode::new("项目", "挑战杯:自动驾驶"),
            ];
            let hit = resolve("项目:挑战杯:自动驾驶.测试实车", &nodes).expect("match");
            assert_eq!(hit.name, "挑战杯:自动驾驶");
            assert_eq!(resolve_index("项目:挑战杯.答辩", &nodes), Some(0));
        }

        #[test]
        fn resolve_ignores_partial_segments_and_whitespace() {
            let nodes = vec![StatusNode::new("项目", "挑战杯")];
            assert!(resolve("项目:挑战杯自动驾驶", &nodes).is_none());
            assert!(resolve("项目 . 挑战杯 : 测试", &nodes).is_some());
            assert!(resolve("", &nodes).is_none());
        }

        #[test]
        fn resolve_ties_go_to_first_declared() {
            let mut first = StatusNode::new("项目", "A");
            first.items.push(crate::core::StatusItem::new("x", "已完成"));
            let nodes = vec![first.clone(), StatusNode::new("项目", "A")];
            assert_eq!(resolve_index("项目:A:b", &nodes), Some(0));
            assert_eq!(resolve("项目.A", &nodes), Some(&first));
        }

        #[test]
        fn related_contexts() {
            assert!(are_contexts_related(
                Some("项目:挑战杯:自动驾驶.测试实车"),
                "项目:挑战杯:自动驾驶.PID与ROS"
            ));
            assert!(are_contexts_related(Some("项目:挑战杯"), "项目.挑战杯.自动驾驶"));
            assert!(are_contexts_related(Some("项目:挑战杯:自动驾驶"), "项目: 挑战杯"));
            assert!(!are_contexts_related(Some("项目:A:x"), "任务:B"));
            assert!(!are_contexts_related(None, "项目:挑战杯"));
        }

        #[test]
        fn status_vocabulary_and_percent_messages() {
            assert!(is_status_message("已全部完成"));
            assert!(is_status_message("重新开始调参"));
            assert!(is_status_message("75%"));
            assert!(!is_status_message("写了一些代码"));
            assert!(!is_status_message("大约75%"));
        }

        #[test]
        fn tone_precedence() {
            assert_eq!(Tone::of("已完成"), Tone::Success);
            assert_eq!(Tone::of("已全部完成"), Tone::Success);
            assert_eq!(Tone::of("测试失败"), Tone::Failure);
            assert_eq!(Tone::of("放弃后重启"), Tone::Failure);
            assert_eq!(Tone::of("恢复"), Tone::Restart);
            assert_eq!(Tone::of("未开始"), Tone::Restart);
            assert_eq!(Tone::of("进行中"), Tone::Neutral);
        }

        #[test]
        fn tracker_is_single_pass_and_always_advances() {
            let group = LogGroup {
                date: "2024.05.01".into(),
                entries: vec![
                    entry("项目:挑战杯:自动驾驶.测试实车", "已完成"),
                    entry("项目:挑战杯:自动驾驶.测试实车", "调好了PID"),
                    entry("项目:挑战杯:自动驾驶.PID与ROS", "开始"),
                    entry("任务:读书", "失败"),
                    entry("任务:读书", "50%"),
                ],
            };
            assert_eq!(
                annotate_group(&group),
                vec![None, None, Some(Tone::Restart), None, Some(Tone::Neutral)]
            );
        }

        #[test]
        fn entries_without_context_chain_with_each_other() {
            let mut tracker = TransitionTracker::new();
            assert_eq!(tracker.observe(&entry(NO_CONTEXT, "开始")), None);
            assert_eq!(tracker.observe(&entry(NO_CONTEXT, "已完成")), Some(Tone::Success));
            assert_eq!(tracker.observe(&entry("项目:A", "已完成")), None);
        }

        #[test]
        fn tracker_starts_fresh_per_group() {
            let mut tracker = TransitionTracker::new();
            assert_eq!(tracker.observe(&entry("项目:A", "已完成")), None);
            assert_eq!(tracker.observe(&entry("项目:A", "已完成")), Some(Tone::Success));
        }
    }
}

pub mod ordering {
    //! Display order for status nodes.

    use crate::classify::is_node_done;
    use crate::core::StatusNode;

    /// Category rank first; unfinished before done. Ties keep their input order.
    pub fn sort_key(node: &StatusNode) -> (u8, bool) {
        (node.kind().rank(), is_node_done(node))
    }

    /// Stable sort of `nodes` into display order.
    pub fn sort_nodes(mut nodes: Vec<StatusNode>) -> Vec<StatusNode> {
        nodes.sort_by_key(sort_key);
        nodes
    }

    /// Display order as indices into `nodes`.
    pub fn sort_order(nodes: &[StatusNode]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..nodes.len()).collect();
        order.sort_by_key(|&idx| sort_key(&nodes[idx]));
        order
    }

}

pub mod storage {
    //! Where notation text comes from.
    //!
    //! The core only ever sees a finished `String` or a [`FetchError`]; fetching is
    //! never retried.

    use serde::{Deserialize, Serialize};
    use std::{collections::HashMap, fmt, fs, io, path::PathBuf, thread};

    /// The two named inputs of a dashboard.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Resource {
        Log,
        Work,
    }

    impl Resource {
        pub fn default_file_name(self) -> &'static str {
            match self {
                Self::Log => "log.md",
                Self::Work => "work.md",
            }
        }
    }

    impl fmt::Display for Resource {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::Log => f.write_str("log"),
                Self::Work => f.write_str("work status"),
            }
        }
    }

    #[derive(Debug, thiserror::Error)]
    pub enum FetchError {
        #[error("{resource} file not found at {path:?}")]
        NotFound { resource: Resource, path: PathBuf },
        #[error("failed to read {resource} from {path:?}: {source}")]
        Io {
            resource: Resource,
            path: PathBuf,
            #[source]
            source: io::Error,
        },
        #[error("{resource} at {path:?} is not valid UTF-8")]
        InvalidUtf8 { resource: Resource, path: PathBuf },
        #[error("{0} is not available")]
        Unavailable(Resource),
    }

    pub trait TextSource {
        fn fetch(&self, resource: Resource) -> Result<String, FetchError>;
    }

    /// Fetch both resources at once; the log on a scoped thread, the status
    /// file on the caller's.
    pub fn fetch_both<S>(source: &S) -> (Result<String, FetchError>, Result<String, FetchError>)
    where
        S: TextSource + Sync + ?Sized,
    {
        thread::scope(|scope| {
            let log = scope.spawn(|| source.fetch(Resource::Log));
            let work = source.fetch(Resource::Work);
            let log = log
                .join()
                .unwrap_or(Err(FetchError::Unavailable(Resource::Log)));
            (log, work)
        })
    }

    /* ------------------------------ Directory ------------------------------ */

    /// Reads `log.md` and `work.md` (or overridden names) from one directory.
    #[derive(Debug, Clone)]
    pub struct DirSource {
        root: PathBuf,
        log_file: String,
        work_file: String,
    }

    impl DirSource {
        pub fn new(root: impl Into<PathBuf>) -> Self {
            Self {
                root: root.into(),
                log_file: Resource::Log.default_file_name().to_string(),
                work_file: Resource::Work.default_file_name().to_string(),
            }
        }

        pub fn with_file_name(mut self, resource: Resource, name: impl Into<String>) -> Self {
            match resource {
                Resource::Log => self.log_file = name.into(),
                Resource::Work => self.work_file = name.into(),
            }
            self
        }

        pub fn path_of(&self, resource: Resource) -> PathBuf {
            match resource {
                Resource::Log => self.root.join(&self.log_file),
                Resource::Work => self.root.join(&self.work_file),
            }
        }
    }

    impl TextSource for DirSource {
        fn fetch(&self, resource: Resource) -> Result<String, FetchError> {
            let path = self.path_of(resource);
            let bytes = fs::read(&path).map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => FetchError::NotFound {
                    resource,
                    path: path.clone(),
                },
                _ => FetchError::Io {
                    resource,
                    path: path.clone(),
                    source,
                },
            })?;
            String::from_utf8(bytes).map_err(|_| FetchError::InvalidUtf8 { resource, path })
        }
    }

    /* ------------------------------- Memory ------------------------------- */

    /// In-memory texts, for embedding and tests.
    #[derive(Debug, Clone, Default)]
    pub struct MemorySource {
        texts: HashMap<Resource, String>,
    }

    impl MemorySource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(mut self, resource: Resource, text: impl Into<String>) -> Self {
            self.texts.insert(resource, text.into());
            self
        }
    }

    impl TextSource for MemorySource {
        fn fetch(&self, resource: Resource) -> Result<String, FetchError> {
            self.texts
                .get(&resource)
                .cloned()
                .ok_or(FetchError::Unavailable(resource))
        }
    }

}

pub mod projectors {
    pub mod dashboard_projector {
        //! Render-ready view of both panels.
        //!
        //! Everything a renderer needs is precomputed here: entry annotations,
        //! card positions, verdicts, item states and progress, plus a per-category
        //! tally. Each panel loads or fails on its own.

        use crate::classify::{ItemState, NodeVerdict, classify_label, node_verdict, progress_percent};
        use crate::core::*;
        use crate::linker::{Tone, annotate_group, resolve_index};
        use crate::ordering::sort_order;
        use crate::parser::{parse_log_from_str, parse_status_from_str};
        use crate::storage::{FetchError, TextSource, fetch_both};
        use chrono::NaiveDate;
        use indexmap::IndexMap;
        use serde::Serialize;
        use tracing::warn;

        pub const LOG_PANEL_FAILURE: &str = "无法加载开发日志";
        pub const PROJECT_PANEL_FAILURE: &str = "无法加载项目进度";

        /* ------------------------------- Options ------------------------------- */

        /// Which log groups to keep. Date bounds are inclusive; groups whose date
        /// token is not a real calendar day are dropped while a bound is set.
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct LogFilter {
            pub since: Option<NaiveDate>,
            pub until: Option<NaiveDate>,
            /// Keep at most this many groups (newest first).
            pub limit: Option<usize>,
        }

        impl LogFilter {
            fn admits(&self, group: &LogGroup) -> bool {
                if self.since.is_none() && self.until.is_none() {
                    return true;
                }
                let Some(date) = group.calendar_date() else {
                    return false;
                };
                self.since.is_none_or(|since| date >= since)
                    && self.until.is_none_or(|until| date <= until)
            }
        }

        #[derive(Debug, Clone, Copy, Default)]
        pub struct DashboardOptions {
            pub log_filter: LogFilter,
        }

        /* ------------------------------- Log panel ------------------------------- */

        #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
        pub struct EntryView {
            pub context: String,
            /// False for the [`NO_CONTEXT`] sentinel; text views print the message alone.
            pub has_context: bool,
            pub context_kind: ContextKind,
            pub message: String,
            pub is_status_update: bool,
            pub tone: Option<Tone>,
        }

        #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
        pub struct LogGroupView {
            pub date: String,
            pub calendar_date: Option<NaiveDate>,
            pub entries: Vec<EntryView>,
        }

        #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
        pub struct LogPanel {
            pub groups: Vec<LogGroupView>,
        }

        pub fn project_log(groups: &[LogGroup], filter: &LogFilter) -> LogPanel {
            let groups = groups
                .iter()
                .filter(|group| filter.admits(group))
                .take(filter.limit.unwrap_or(usize::MAX))
                .map(project_group)
                .collect();
            LogPanel { groups }
        }

        fn project_group(group: &LogGroup) -> LogGroupView {
            let entries = group
                .entries
                .iter()
                .zip(annotate_group(group))
                .map(|(entry, tone)| EntryView {
                    context: entry.context.clone(),
                    has_context: entry.has_context(),
                    context_kind: entry.context_kind(),
                    message: entry.message.clone(),
                    is_status_update: tone.is_some(),
                    tone,
                })
                .collect();
            LogGroupView {
                date: group.date.clone(),
                calendar_date: group.calendar_date(),
                entries,
            }
        }

        /* ----------------------------- Project panel ----------------------------- */

        #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
        pub struct ItemView {
            pub name: String,
            pub display_name: String,
            pub status: String,
            pub state: ItemState,
            pub progress: Option<u32>,
        }

        #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
        pub struct NodeCard {
            /// Position in display order, starting at 0.
            pub position: usize,
            /// Position in the status file.
            pub declared_index: usize,
            pub category: String,
            pub kind: Category,
            pub name: String,
            pub verdict: NodeVerdict,
            pub items: Vec<ItemView>,
        }

        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
        pub struct CategoryTally {
            pub total: usize,
            pub completed: usize,
            pub failed: usize,
            pub open: usize,
        }

        #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
        pub struct ProjectPanel {
            /// Nodes in declaration order, kept for context resolution.
            #[serde(skip)]
            pub nodes: Vec<StatusNode>,
            /// Cards in display order.
            pub cards: Vec<NodeCard>,
            /// Per-category counts, keyed by category label in display order.
            pub summary: IndexMap<String, CategoryTally>,
        }

        impl ProjectPanel {
            /// Card for the node a log context points at.
            pub fn resolve(&self, context: &str) -> Option<&NodeCard> {
                let idx = resolve_index(context, &self.nodes)?;
                self.cards.iter().find(|card| card.declared_index == idx)
            }
        }

        pub fn project_status(nodes: Vec<StatusNode>) -> ProjectPanel {
            let mut summary: IndexMap<String, CategoryTally> = IndexMap::new();
            let cards: Vec<NodeCard> = sort_order(&nodes)
                .into_iter()
                .enumerate()
                .filter_map(|(position, declared_index)| {
                    let node = nodes.get(declared_index)?;
                    let verdict = node_verdict(node);

                    let tally = summary.entry(node.category.clone()).or_default();
                    tally.total += 1;
                    match verdict {
                        NodeVerdict::Completed => tally.completed += 1,
                        NodeVerdict::Failed => tally.failed += 1,
                        NodeVerdict::Open => tally.open += 1,
                    }

                    Some(NodeCard {
                        position,
                        declared_index,
                        category: node.category.clone(),
                        kind: node.kind(),
                        name: node.name.clone(),
                        verdict,
                        items: node.items.iter().map(project_item).collect(),
                    })
                })
                .collect();
            ProjectPanel {
                nodes,
                cards,
                summary,
            }
        }

        fn project_item(item: &StatusItem) -> ItemView {
            ItemView {
                name: item.name.clone(),
                display_name: item.display_name().to_string(),
                status: item.status.clone(),
                state: classify_label(&item.status),
                progress: progress_percent(&item.status),
            }
        }

        /* -------------------------------- Panels -------------------------------- */

        #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
        #[serde(tag = "state", rename_all = "snake_case")]
        pub enum Panel<T> {
            Loaded(T),
            /// Localized, user-facing reason.
            Failed { reason: String },
        }

        impl<T> Panel<T> {
            pub fn loaded(&self) -> Option<&T> {
                match self {
                    Self::Loaded(x) => Some(x),
                    Self::Failed { .. } => None,
                }
            }

            pub fn is_failed(&self) -> bool {
                matches!(self, Self::Failed { .. })
            }
        }

        #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
        pub struct Dashboard {
            pub log: Panel<LogPanel>,
            pub projects: Panel<ProjectPanel>,
        }

        impl Dashboard {
            /// Fetch both resources and project whichever loaded.
            pub fn load<S>(source: &S, opts: &DashboardOptions) -> Self
            where
                S: TextSource + Sync + ?Sized,
            {
                let (log, work) = fetch_both(source);
                Self::from_fetched(log, work, opts)
            }

            pub fn from_fetched(
                log: Result<String, FetchError>,
                work: Result<String, FetchError>,
                opts: &DashboardOptions,
            ) -> Self {
                let log = match log {
                    Ok(text) => Panel::Loaded(project_log(
                        &parse_log_from_str(&text),
                        &opts.log_filter,
                    )),
                    Err(err) => {
                        warn!(error = %err, "log panel unavailable");
                        Panel::Failed {
                            reason: format!("{LOG_PANEL_FAILURE} ({err})"),
                        }
                    }
                };
                let projects = match work {
                    Ok(text) => Panel::Loaded(project_status(parse_status_from_str(&text))),
                    Err(err) => {
                        warn!(error = %err, "project panel unavailable");
                        Panel::Failed {
                            reason: format!("{PROJECT_PANEL_FAILURE} ({err})"),
                        }
                    }
                };
                Self { log, projects }
            }

            /// Click-to-navigate: the card a log context points at, if the project
            /// panel loaded.
            pub fn resolve(&self, context: &str) -> Option<&NodeCard> {
                self.projects.loaded()?.resolve(context)
            }
        }

        #[cfg(test)]
        mod tests {
            use super::*;
            use crate::storage::{MemorySource, Resource};

            const LOG: &str = "\
2024.05.01
项目:挑战杯:自动驾驶.测试实车:开始
项目:挑战杯:自动驾驶.测试实车:已完成
2024.05.03
今天休息
2024.05.02
任务:读书:50%
";

            const WORK: &str = "\
技能:Rust{
  所有权.进行中
}
项目:挑战杯{
  答辩.已完成
}
项目:挑战杯:自动驾驶{
  测试实车.已完成
  PID与ROS.40%
}
";

            fn source() -> MemorySource {
                MemorySource::new()
                    .with(Resource::Log, LOG)
                    .with(Resource::Work, WORK)
            }

            #[test]
            fn log_panel_annotates_entries() {
                let dashboard = Dashboard::load(&source(), &DashboardOptions::default());
                let log = dashboard.log.loaded().expect("log panel");
                let dates: Vec<_> = log.groups.iter().map(|g| g.date.as_str()).collect();
                assert_eq!(dates, ["2024.05.02", "2024.05.03", "2024.05.01"]);

                let first_day = &log.groups[2];
                assert!(!first_day.entries[0].is_status_update);
                assert!(first_day.entries[1].is_status_update);
                assert_eq!(first_day.entries[1].tone, Some(Tone::Success));
                assert_eq!(first_day.entries[0].context_kind, ContextKind::Project);
                assert_eq!(log.groups[1].entries[0].context_kind, ContextKind::NoContext);
                assert!(first_day.entries[0].has_context);
                assert!(!log.groups[1].entries[0].has_context);
            }

            #[test]
            fn project_panel_orders_cards_and_tallies() {
                let dashboard = Dashboard::load(&source(), &DashboardOptions::default());
                let panel = dashboard.projects.loaded().expect("project panel");
                let names: Vec<_> = panel.cards.iter().map(|c| c.name.as_str()).collect();
                assert_eq!(names, ["挑战杯:自动驾驶", "挑战杯", "Rust"]);
                assert_eq!(panel.cards[1].verdict, NodeVerdict::Completed);
                assert_eq!(panel.cards[0].items[1].state, ItemState::Percent(40));
                assert_eq!(panel.cards[0].items[1].progress, Some(40));

                let keys: Vec<_> = panel.summary.keys().map(String::as_str).collect();
                assert_eq!(keys, ["项目", "技能"]);
                assert_eq!(
                    panel.summary["项目"],
                    CategoryTally {
                        total: 2,
                        completed: 1,
                        failed: 0,
                        open: 1
                    }
                );
            }

            #[test]
            fn resolve_returns_longest_matching_card() {
                let dashboard = Dashboard::load(&source(), &DashboardOptions::default());
                let card = dashboard
                    .resolve("项目:挑战杯:自动驾驶.测试实车")
                    .expect("card");
                assert_eq!(card.name, "挑战杯:自动驾驶");
                assert_eq!(card.position, 0);
                assert_eq!(card.declared_index, 2);
                assert!(dashboard.resolve("任务:读书").is_none());
            }

            #[test]
            fn panels_fail_independently() {
                let only_work = MemorySource::new().with(Resource::Work, WORK);
                let dashboard = Dashboard::load(&only_work, &DashboardOptions::default());
                match &dashboard.log {
                    Panel::Failed { reason } => assert!(reason.starts_with(LOG_PANEL_FAILURE)),
                    other => panic!("expected failed log panel, got {:?}", other),
                }
                assert!(dashboard.projects.loaded().is_some());

                let only_log = MemorySource::new().with(Resource::Log, LOG);
                let dashboard = Dashboard::load(&only_log, &DashboardOptions::default());
                assert!(dashboard.log.loaded().is_some());
                assert!(dashboard.projects.is_failed());
                assert!(dashboard.resolve("项目:挑战杯").is_none());
            }

            #[test]
            fn log_filter_bounds_and_limit() {
                let groups = parse_log_from_str(LOG);
                let filter = LogFilter {
                    since: NaiveDate::from_ymd_opt(2024, 5, 2),
                    until: None,
                    limit: None,
                };
                let panel = project_log(&groups, &filter);
                let dates: Vec<_> = panel.groups.iter().map(|g| g.date.as_str()).collect();
                assert_eq!(dates, ["2024.05.02", "2024.05.03"]);

                let filter = LogFilter {
                    limit: Some(1),
                    ..LogFilter::default()
                };
                assert_eq!(project_log(&groups, &filter).groups.len(), 1);

                let filter = LogFilter {
                    until: NaiveDate::from_ymd_opt(2024, 5, 1),
                    ..LogFilter::default()
                };
                let panel = project_log(&groups, &filter);
                assert_eq!(panel.groups.len(), 1);
                assert_eq!(panel.groups[0].date, "2024.05.01");
            }

            #[test]
            fn panels_serialize_with_state_tag() {
                let dashboard = Dashboard::from_fetched(
                    Err(FetchError::Unavailable(Resource::Log)),
                    Ok(WORK.to_string()),
                    &DashboardOptions::default(),
                );
                let json = serde_json::to_value(&dashboard).expect("json");
                assert_eq!(json["log"]["state"], "failed");
                assert_eq!(json["projects"]["state"], "loaded");
                assert!(json["projects"].get("nodes").is_none());
                assert_eq!(json["projects"]["cards"][0]["verdict"], "open");
            }
        }
    }
}

pub use parser::{parse_log_from_str, parse_status_from_str};
pub use projectors::dashboard_projector::{Dashboard, DashboardOptions, LogFilter};

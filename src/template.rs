//! Page templates.
//!
//! A small Django-style engine over files in the template directory:
//! `{{ var }}` output (HTML-escaped), `{% if %}`/`{% else %}`, `{% for x in list %}`,
//! and `{% extends "base.html" %}` with `{% block name %}` overrides.
//!
//! Parsed templates are cached per name. `Templates::watch` keeps the cache
//! fresh while templates are edited on disk.

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use log::{debug, info, warn};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use once_cell::sync::Lazy;
use regex::Regex;
use walkdir::WalkDir;

use crate::error::{Result, TemplateError};

const MAX_INHERITANCE_DEPTH: usize = 8;

static TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)(\{\{.*?\}\}|\{%.*?%\})").expect("valid template tag regex"));

/// Values that can be placed in a render context.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    String(String),
    Bool(bool),
    Number(f64),
    List(Vec<TemplateValue>),
    Object(HashMap<String, TemplateValue>),
}

/// Variables available to a template, by name.
pub type Context = HashMap<String, TemplateValue>;

impl TemplateValue {
    /// Text form of a scalar; lists and objects render as nothing.
    pub fn as_string(&self) -> String {
        match self {
            TemplateValue::String(s) => s.clone(),
            TemplateValue::Bool(b) => b.to_string(),
            TemplateValue::Number(n) => n.to_string(),
            TemplateValue::List(_) | TemplateValue::Object(_) => String::new(),
        }
    }

    /// Truthiness used by `{% if %}`.
    pub fn is_truthy(&self) -> bool {
        match self {
            TemplateValue::String(s) => !s.is_empty(),
            TemplateValue::Bool(b) => *b,
            TemplateValue::Number(n) => *n != 0.0,
            TemplateValue::List(items) => !items.is_empty(),
            TemplateValue::Object(map) => !map.is_empty(),
        }
    }
}

impl fmt::Display for TemplateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

impl From<&str> for TemplateValue {
    fn from(value: &str) -> Self {
        TemplateValue::String(value.to_string())
    }
}

impl From<String> for TemplateValue {
    fn from(value: String) -> Self {
        TemplateValue::String(value)
    }
}

impl From<bool> for TemplateValue {
    fn from(value: bool) -> Self {
        TemplateValue::Bool(value)
    }
}

impl From<f64> for TemplateValue {
    fn from(value: f64) -> Self {
        TemplateValue::Number(value)
    }
}

impl<T: Into<TemplateValue>> From<Vec<T>> for TemplateValue {
    fn from(items: Vec<T>) -> Self {
        TemplateValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<HashMap<String, TemplateValue>> for TemplateValue {
    fn from(map: HashMap<String, TemplateValue>) -> Self {
        TemplateValue::Object(map)
    }
}

/// Token types extracted from the template source.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Text(String),
    Variable(String),
    Tag(String),
}

/// AST node types for the template engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Variable(String),
    If {
        condition: String,
        then_body: Vec<Node>,
        else_body: Vec<Node>,
    },
    For {
        var_name: String,
        list_name: String,
        body: Vec<Node>,
    },
    Block {
        name: String,
        body: Vec<Node>,
    },
    Extends(String),
}

/// Splits template source into text, `{{ variable }}` and `{% tag %}` tokens.
pub fn tokenize_template(content: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut last_end = 0;
    for mat in TAG_PATTERN.find_iter(content) {
        if mat.start() > last_end {
            tokens.push(Token::Text(content[last_end..mat.start()].to_string()));
        }
        let raw = mat.as_str();
        if let Some(inner) = raw.strip_prefix("{{").and_then(|s| s.strip_suffix("}}")) {
            tokens.push(Token::Variable(inner.trim().to_string()));
        } else if let Some(inner) = raw.strip_prefix("{%").and_then(|s| s.strip_suffix("%}")) {
            tokens.push(Token::Tag(inner.trim().to_string()));
        }
        last_end = mat.end();
    }
    if last_end < content.len() {
        tokens.push(Token::Text(content[last_end..].to_string()));
    }
    tokens
}

/// Parses tokens into a node tree. `name` is only used in error messages.
pub fn parse_tokens(name: &str, tokens: &[Token]) -> Result<Vec<Node>, TemplateError> {
    let mut parser = Parser {
        name,
        tokens,
        idx: 0,
    };
    let (nodes, end) = parser.parse_until(&[])?;
    match end {
        None => Ok(nodes),
        Some(tag) => Err(parser.syntax(format!("unexpected '{{% {tag} %}}'"))),
    }
}

struct Parser<'a> {
    name: &'a str,
    tokens: &'a [Token],
    idx: usize,
}

impl Parser<'_> {
    fn syntax(&self, message: String) -> TemplateError {
        TemplateError::Syntax {
            name: self.name.to_string(),
            message,
        }
    }

    /// Consumes nodes up to one of `end_tags`, returning the tag that stopped it.
    /// At top level (`end_tags` empty) any stray end tag is returned as well.
    fn parse_until(&mut self, end_tags: &[&str]) -> Result<(Vec<Node>, Option<String>), TemplateError> {
        let tokens = self.tokens;
        let mut nodes = Vec::new();
        while let Some(token) = tokens.get(self.idx) {
            self.idx += 1;
            let tag = match token {
                Token::Text(text) => {
                    nodes.push(Node::Text(text.clone()));
                    continue;
                }
                Token::Variable(var) => {
                    nodes.push(Node::Variable(var.clone()));
                    continue;
                }
                Token::Tag(tag) => tag.as_str(),
            };

            if end_tags.contains(&tag) || is_end_tag(tag) {
                return Ok((nodes, Some(tag.to_string())));
            }

            let mut words = tag.split_whitespace();
            match words.next() {
                Some("extends") => {
                    let parent = tag["extends".len()..].trim().trim_matches(['"', '\'']);
                    nodes.push(Node::Extends(parent.to_string()));
                }
                Some("block") => {
                    let name = words
                        .next()
                        .ok_or_else(|| self.syntax("block without a name".into()))?
                        .to_string();
                    let body = self.expect_body(&["endblock"], "block")?.0;
                    nodes.push(Node::Block { name, body });
                }
                Some("if") => {
                    let condition = tag["if".len()..].trim().to_string();
                    let (then_body, end) = self.expect_body(&["else", "endif"], "if")?;
                    let else_body = if end == "else" {
                        self.expect_body(&["endif"], "if")?.0
                    } else {
                        Vec::new()
                    };
                    nodes.push(Node::If {
                        condition,
                        then_body,
                        else_body,
                    });
                }
                Some("for") => {
                    let parts: Vec<&str> = words.collect();
                    let [var_name, "in", list_name] = parts.as_slice() else {
                        return Err(self.syntax(format!("malformed loop '{{% {tag} %}}'")));
                    };
                    let (var_name, list_name) = (var_name.to_string(), list_name.to_string());
                    let body = self.expect_body(&["endfor"], "for")?.0;
                    nodes.push(Node::For {
                        var_name,
                        list_name,
                        body,
                    });
                }
                _ => return Err(self.syntax(format!("unknown tag '{{% {tag} %}}'"))),
            }
        }
        Ok((nodes, None))
    }

    fn expect_body(&mut self, end_tags: &[&str], opener: &str) -> Result<(Vec<Node>, String), TemplateError> {
        match self.parse_until(end_tags)? {
            (body, Some(end)) if end_tags.contains(&end.as_str()) => Ok((body, end)),
            (_, Some(end)) => Err(self.syntax(format!("unexpected '{{% {end} %}}' inside '{opener}'"))),
            (_, None) => Err(self.syntax(format!("unterminated '{opener}'"))),
        }
    }
}

fn is_end_tag(tag: &str) -> bool {
    matches!(tag, "else" | "endif" | "endfor" | "endblock")
}

fn resolve_variable<'a>(name: &str, context: &'a Context) -> Option<&'a TemplateValue> {
    let mut keys = name.split('.');
    let mut current = context.get(keys.next()?)?;
    for key in keys {
        match current {
            TemplateValue::Object(map) => current = map.get(key)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Escapes the characters that are significant in HTML text and attributes.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Replaces parent blocks with the child's blocks of the same name.
fn merge_blocks(nodes: &[Node], blocks: &HashMap<String, Vec<Node>>) -> Vec<Node> {
    nodes
        .iter()
        .map(|node| match node {
            Node::Block { name, body } => Node::Block {
                name: name.clone(),
                body: match blocks.get(name) {
                    Some(child) => child.clone(),
                    None => merge_blocks(body, blocks),
                },
            },
            Node::If {
                condition,
                then_body,
                else_body,
            } => Node::If {
                condition: condition.clone(),
                then_body: merge_blocks(then_body, blocks),
                else_body: merge_blocks(else_body, blocks),
            },
            Node::For {
                var_name,
                list_name,
                body,
            } => Node::For {
                var_name: var_name.clone(),
                list_name: list_name.clone(),
                body: merge_blocks(body, blocks),
            },
            other => other.clone(),
        })
        .collect()
}

/// Collects the blocks a template defines, outermost first wins for nested names.
fn collect_blocks(nodes: &[Node], blocks: &mut HashMap<String, Vec<Node>>) {
    for node in nodes {
        if let Node::Block { name, body } = node {
            blocks.entry(name.clone()).or_insert_with(|| body.clone());
            collect_blocks(body, blocks);
        }
    }
}

/// Renders a node tree against `context`. Unknown variables render as nothing.
pub fn render_nodes(nodes: &[Node], context: &Context) -> String {
    let mut out = String::new();
    render_into(&mut out, nodes, context);
    out
}

fn render_into(out: &mut String, nodes: &[Node], context: &Context) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Variable(name) => {
                if let Some(value) = resolve_variable(name, context) {
                    out.push_str(&escape_html(&value.as_string()));
                }
            }
            Node::If {
                condition,
                then_body,
                else_body,
            } => {
                let truthy = resolve_variable(condition, context).is_some_and(TemplateValue::is_truthy);
                render_into(out, if truthy { then_body } else { else_body }, context);
            }
            Node::For {
                var_name,
                list_name,
                body,
            } => {
                if let Some(TemplateValue::List(items)) = resolve_variable(list_name, context) {
                    let mut local = context.clone();
                    for item in items {
                        local.insert(var_name.clone(), item.clone());
                        render_into(out, body, &local);
                    }
                }
            }
            Node::Block { body, .. } => render_into(out, body, context),
            Node::Extends(_) => {}
        }
    }
}

/// Template store rooted at a directory, with a parse cache.
#[derive(Debug)]
pub struct Templates {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<Vec<Node>>>>,
}

impl Templates {
    /// Create a store for templates under `dir`; nothing is read until first use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Templates {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Root directory templates are resolved against.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Parses every `.html` file under the directory into the cache.
    /// Fails on the first template that does not parse.
    pub fn preload(&self) -> Result<usize> {
        let mut loaded = 0;
        for entry in WalkDir::new(&self.dir).follow_links(true) {
            let entry = entry.map_err(|err| {
                std::io::Error::other(format!("walking {}: {err}", self.dir.display()))
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "html") {
                continue;
            }
            let Ok(relative) = path.strip_prefix(&self.dir) else {
                continue;
            };
            let name = relative.to_string_lossy().replace('\\', "/");
            self.load(&name)?;
            loaded += 1;
        }
        info!("Preloaded {} templates from {}", loaded, self.dir().display());
        Ok(loaded)
    }

    /// Drops every parsed template; the next render reads from disk.
    pub fn invalidate(&self) {
        self.cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    /// Number of parsed templates currently cached.
    pub fn cached(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn load(&self, name: &str) -> Result<Arc<Vec<Node>>, TemplateError> {
        if let Some(nodes) = self
            .cache
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
        {
            return Ok(Arc::clone(nodes));
        }

        // Only plain relative names resolve inside the template directory.
        if Path::new(name)
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
        {
            return Err(TemplateError::NotFound {
                name: name.to_string(),
            });
        }
        let path = self.dir.join(name);
        let source = std::fs::read_to_string(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                TemplateError::NotFound {
                    name: name.to_string(),
                }
            } else {
                TemplateError::Io { path, source }
            }
        })?;
        let nodes = Arc::new(parse_tokens(name, &tokenize_template(&source))?);
        debug!("Parsed template {}", name);

        self.cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), Arc::clone(&nodes));
        Ok(nodes)
    }

    /// Renders `name`, resolving its `extends` chain.
    pub fn render(&self, name: &str, context: &Context) -> Result<String, TemplateError> {
        let mut nodes = self.load(name)?;
        let mut blocks = HashMap::new();
        let mut depth = 0;

        while let Some(parent) = nodes.iter().find_map(|node| match node {
            Node::Extends(parent) => Some(parent.clone()),
            _ => None,
        }) {
            depth += 1;
            if depth > MAX_INHERITANCE_DEPTH {
                return Err(TemplateError::InheritanceTooDeep {
                    name: name.to_string(),
                });
            }
            // Blocks collected so far belong to descendants and take precedence.
            let mut own = HashMap::new();
            collect_blocks(&nodes, &mut own);
            for (block, body) in own {
                blocks.entry(block).or_insert(body);
            }
            nodes = self.load(&parent)?;
        }

        let merged = merge_blocks(&nodes, &blocks);
        Ok(render_nodes(&merged, context))
    }

    /// Watches the template directory and drops the cache on every change.
    /// The returned watcher must be kept alive.
    pub fn watch(self: &Arc<Self>) -> Result<RecommendedWatcher> {
        let templates = Arc::clone(self);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                if matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    if let Some(path) = event.paths.first() {
                        info!("Template changed: {}", path.display());
                    }
                    templates.invalidate();
                }
            }
            Err(err) => warn!("Template watch error: {}", err),
        })?;
        watcher.watch(&self.dir, RecursiveMode::Recursive)?;
        info!("Watching {} for template changes", self.dir().display());
        Ok(watcher)
    }
}

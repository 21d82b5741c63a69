//! A small XPath evaluator over [`XmlDocument`].
//!
//! Supported: absolute (`/a/b`) and relative paths, the descendant
//! shorthand `//`, name tests and `*`, `.` and `..`, positional predicates
//! (`[2]`, `[last()]`), attribute predicates (`[@id]`, `[@id='7']`), and a
//! terminal `@name`, `@*` or `text()` step. Anything else is rejected with
//! [`DecodeError::XPath`].

use super::xml::{XmlDocument, XmlElement, XmlNode};
use crate::error::{DecodeError, XPathSnafu};

/// A node selected by an XPath expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XPathMatch<'a> {
    /// An element.
    Element(&'a XmlElement),
    /// An attribute value.
    Attribute(&'a str),
    /// A text node.
    Text(&'a str),
}

impl XPathMatch<'_> {
    /// Returns the string value of the node.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Element(element) => element.text(),
            Self::Attribute(value) | Self::Text(value) => (*value).to_string(),
        }
    }
}

/// Evaluates XPath expressions against one document.
#[derive(Debug, Clone)]
pub struct XPath {
    document: XmlDocument,
}

impl XPath {
    /// Wraps a document.
    #[must_use]
    pub fn new(document: XmlDocument) -> Self {
        Self { document }
    }

    /// Returns the document queried.
    #[must_use]
    pub fn document(&self) -> &XmlDocument {
        &self.document
    }

    /// Returns the nodes selected by `expression`.
    ///
    /// Relative expressions are evaluated from the document node.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::XPath`] if the expression is outside the
    /// supported subset.
    pub fn select(&self, expression: &str) -> Result<Vec<XPathMatch<'_>>, DecodeError> {
        let path = parse_path(expression)?;
        Ok(evaluate(&self.document, &path))
    }

    /// Returns the string values of the nodes selected by `expression`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::XPath`] if the expression is outside the
    /// supported subset.
    pub fn select_text(&self, expression: &str) -> Result<Vec<String>, DecodeError> {
        Ok(self
            .select(expression)?
            .iter()
            .map(XPathMatch::text)
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    SelfNode,
    Parent,
    Child {
        name: Option<String>,
        predicates: Vec<Predicate>,
    },
    Attribute(Option<String>),
    Text,
}

impl Step {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Attribute(_) | Self::Text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Position(usize),
    Last,
    HasAttribute(String),
    AttributeEquals(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    descendant: bool,
    step: Step,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Path {
    segments: Vec<Segment>,
}

fn unsupported<T>(expression: &str, reason: impl Into<String>) -> Result<T, DecodeError> {
    XPathSnafu {
        expression,
        reason: reason.into(),
    }
    .fail()
}

fn parse_path(expression: &str) -> Result<Path, DecodeError> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return unsupported(expression, "empty expression");
    }

    let Some(pieces) = split_steps(trimmed) else {
        return unsupported(expression, "unbalanced brackets or quotes");
    };

    let mut iter = pieces.into_iter().peekable();
    // A leading empty piece means the path starts at the document node,
    // which is also where relative paths start.
    if iter.peek().is_some_and(|piece| piece.is_empty()) {
        iter.next();
    }

    let mut segments: Vec<Segment> = Vec::new();
    let mut descendant = false;
    for piece in iter {
        if segments.last().is_some_and(|s| s.step.is_terminal()) {
            return unsupported(expression, "`@` and `text()` must be the last step");
        }
        if piece.is_empty() {
            if descendant {
                return unsupported(expression, "too many `/`");
            }
            descendant = true;
            continue;
        }
        let step = match parse_step(piece) {
            Ok(step) => step,
            Err(reason) => return unsupported(expression, reason),
        };
        segments.push(Segment { descendant, step });
        descendant = false;
    }

    if descendant || segments.is_empty() {
        return unsupported(expression, "expected a step after `/`");
    }
    Ok(Path { segments })
}

/// Splits at `/` outside brackets and quotes.
fn split_steps(expression: &str) -> Option<Vec<&str>> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (index, c) in expression.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.checked_sub(1)?,
            (None, '/') if depth == 0 => {
                pieces.push(&expression[start..index]);
                start = index + 1;
            }
            (None, _) => {}
        }
    }
    if depth != 0 || quote.is_some() {
        return None;
    }
    pieces.push(&expression[start..]);
    Some(pieces)
}

fn parse_step(piece: &str) -> Result<Step, String> {
    match piece {
        "." => return Ok(Step::SelfNode),
        ".." => return Ok(Step::Parent),
        "text()" => return Ok(Step::Text),
        "@*" => return Ok(Step::Attribute(None)),
        _ => {}
    }
    if let Some(name) = piece.strip_prefix('@') {
        if !is_name(name) {
            return Err(format!("invalid attribute name `{name}`"));
        }
        return Ok(Step::Attribute(Some(name.to_string())));
    }

    let (name, mut rest) = match piece.find('[') {
        Some(index) => piece.split_at(index),
        None => (piece, ""),
    };
    let name = match name {
        "*" => None,
        name if is_name(name) => Some(name.to_string()),
        name => return Err(format!("unsupported step `{name}`")),
    };

    let mut predicates = Vec::new();
    while !rest.is_empty() {
        let Some(inner) = rest.strip_prefix('[') else {
            return Err(format!("unexpected `{rest}`"));
        };
        let end = closing_bracket(inner).ok_or("unbalanced brackets")?;
        predicates.push(parse_predicate(&inner[..end])?);
        rest = &inner[end + 1..];
    }
    Ok(Step::Child { name, predicates })
}

fn closing_bracket(inner: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (index, c) in inner.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, ']') => return Some(index),
            (None, _) => {}
        }
    }
    None
}

fn parse_predicate(inner: &str) -> Result<Predicate, String> {
    let inner = inner.trim();
    if inner == "last()" {
        return Ok(Predicate::Last);
    }
    if let Ok(position) = inner.parse::<usize>() {
        if position == 0 {
            return Err("positions start at 1".to_string());
        }
        return Ok(Predicate::Position(position));
    }
    let Some(attribute) = inner.strip_prefix('@') else {
        return Err(format!("unsupported predicate `[{inner}]`"));
    };
    match attribute.split_once('=') {
        None if is_name(attribute.trim()) => Ok(Predicate::HasAttribute(attribute.trim().to_string())),
        Some((name, value)) if is_name(name.trim()) => {
            let value = value.trim();
            let unquoted = value
                .strip_prefix('\'')
                .and_then(|v| v.strip_suffix('\''))
                .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
                .ok_or_else(|| format!("attribute value `{value}` must be quoted"))?;
            Ok(Predicate::AttributeEquals(
                name.trim().to_string(),
                unquoted.to_string(),
            ))
        }
        _ => Err(format!("unsupported predicate `[{inner}]`")),
    }
}

fn is_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}

/// A node and its ancestors, root first. The empty chain is the document node.
type Chain<'a> = Vec<&'a XmlElement>;

fn evaluate<'a>(document: &'a XmlDocument, path: &Path) -> Vec<XPathMatch<'a>> {
    let mut context: Vec<Chain<'a>> = vec![Vec::new()];

    for segment in &path.segments {
        if segment.descendant {
            context = descendants_or_self(document, &context);
        }
        match &segment.step {
            Step::SelfNode => {}
            Step::Parent => {
                context = context
                    .into_iter()
                    .filter_map(|mut chain| {
                        chain.pop()?;
                        Some(chain)
                    })
                    .collect();
            }
            Step::Child { name, predicates } => {
                let mut next = Vec::new();
                for chain in &context {
                    let candidates = children(document, chain)
                        .into_iter()
                        .filter(|child| name.as_deref().is_none_or(|name| child.name() == name))
                        .collect();
                    for child in apply_predicates(candidates, predicates) {
                        let mut extended = chain.clone();
                        extended.push(child);
                        next.push(extended);
                    }
                }
                context = next;
            }
            Step::Attribute(name) => {
                return dedup(context)
                    .into_iter()
                    .filter_map(|chain| chain.last().copied())
                    .flat_map(move |element| {
                        element
                            .attributes()
                            .iter()
                            .filter(move |(key, _)| name.as_deref().is_none_or(|name| key == name))
                            .map(|(_, value)| XPathMatch::Attribute(value.as_str()))
                    })
                    .collect();
            }
            Step::Text => {
                return dedup(context)
                    .into_iter()
                    .filter_map(|chain| chain.last().copied())
                    .flat_map(|element| {
                        element.children().iter().filter_map(|node| match node {
                            XmlNode::Text(text) => Some(XPathMatch::Text(text.as_str())),
                            XmlNode::Element(_) => None,
                        })
                    })
                    .collect();
            }
        }
        context = dedup(context);
    }

    context
        .into_iter()
        .filter_map(|chain| chain.last().copied().map(XPathMatch::Element))
        .collect()
}

fn children<'a>(document: &'a XmlDocument, chain: &[&'a XmlElement]) -> Vec<&'a XmlElement> {
    match chain.last() {
        None => vec![document.root()],
        Some(element) => element.elements().collect(),
    }
}

fn descendants_or_self<'a>(document: &'a XmlDocument, context: &[Chain<'a>]) -> Vec<Chain<'a>> {
    let mut out = Vec::new();
    for chain in context {
        let mut pending = vec![chain.clone()];
        while let Some(current) = pending.pop() {
            // Reverse so the walk stays in document order.
            for child in children(document, &current).into_iter().rev() {
                let mut extended = current.clone();
                extended.push(child);
                pending.push(extended);
            }
            out.push(current);
        }
    }
    dedup(out)
}

fn apply_predicates<'a>(
    mut candidates: Vec<&'a XmlElement>,
    predicates: &[Predicate],
) -> Vec<&'a XmlElement> {
    for predicate in predicates {
        candidates = match predicate {
            Predicate::Position(position) => candidates
                .get(position - 1)
                .copied()
                .into_iter()
                .collect(),
            Predicate::Last => candidates.last().copied().into_iter().collect(),
            Predicate::HasAttribute(name) => candidates
                .into_iter()
                .filter(|element| element.attribute(name).is_some())
                .collect(),
            Predicate::AttributeEquals(name, value) => candidates
                .into_iter()
                .filter(|element| element.attribute(name) == Some(value.as_str()))
                .collect(),
        };
    }
    candidates
}

fn dedup(chains: Vec<Chain<'_>>) -> Vec<Chain<'_>> {
    let mut out: Vec<Chain<'_>> = Vec::with_capacity(chains.len());
    for chain in chains {
        let seen = out.iter().any(|existing| match (existing.last(), chain.last()) {
            (Some(a), Some(b)) => std::ptr::eq(*a, *b),
            (None, None) => true,
            _ => false,
        });
        if !seen {
            out.push(chain);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::xml::parse;

    fn xpath() -> XPath {
        let mut document = parse(
            r#"<library>
                <shelf name="a">
                    <book id="1" lang="en"><title>Dune</title></book>
                    <book id="2"><title>Emma</title></book>
                </shelf>
                <shelf name="b">
                    <book id="3" lang="fr"><title>Nana</title></book>
                    <note>see <b>desk</b></note>
                </shelf>
            </library>"#,
        )
        .unwrap();
        document.normalize();
        XPath::new(document)
    }

    #[test]
    fn absolute_paths() {
        let xpath = xpath();
        assert_eq!(
            xpath.select_text("/library/shelf/book/title").unwrap(),
            vec!["Dune", "Emma", "Nana"]
        );
        assert_eq!(xpath.select_text("library/shelf[2]/@name").unwrap(), vec!["b"]);
        assert!(xpath.select("/shelf").unwrap().is_empty());
    }

    #[test]
    fn descendant_paths_apply_positions_per_parent() {
        let xpath = xpath();
        assert_eq!(
            xpath.select_text("//book[1]/@id").unwrap(),
            vec!["1", "3"]
        );
        assert_eq!(xpath.select_text("//book[last()]/@id").unwrap(), vec!["2", "3"]);
        assert_eq!(xpath.select("//title").unwrap().len(), 3);
    }

    #[test]
    fn attribute_predicates() {
        let xpath = xpath();
        assert_eq!(xpath.select_text("//book[@lang]/@id").unwrap(), vec!["1", "3"]);
        assert_eq!(
            xpath.select_text("//book[@lang=\"fr\"]/title").unwrap(),
            vec!["Nana"]
        );
        assert_eq!(
            xpath.select_text("//book[@lang='en'][1]/@*").unwrap(),
            vec!["1", "en"]
        );
    }

    #[test]
    fn parent_and_self_steps() {
        let xpath = xpath();
        assert_eq!(
            xpath.select_text("//book[@id='2']/../@name").unwrap(),
            vec!["a"]
        );
        assert_eq!(xpath.select_text("//book/./../@name").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn text_step_returns_direct_text_only() {
        let xpath = xpath();
        assert_eq!(xpath.select_text("//note/text()").unwrap(), vec!["see "]);
        assert_eq!(xpath.select_text("//note").unwrap(), vec!["see desk"]);
    }

    #[test]
    fn wildcard_children() {
        let xpath = xpath();
        assert_eq!(xpath.select("/library/shelf[2]/*").unwrap().len(), 2);
        let first = xpath.select("/library/*[1]").unwrap();
        assert!(matches!(
            first.as_slice(),
            [XPathMatch::Element(shelf)] if shelf.attribute("name") == Some("a")
        ));
    }

    #[test]
    fn rejects_unsupported_expressions() {
        let xpath = xpath();
        for expression in [
            "",
            "/",
            "//",
            "///book",
            "//book[",
            "//book[position() > 1]",
            "//book[@lang=en]",
            "//book/@id/title",
            "count(//book)",
            "//book[0]",
        ] {
            assert!(
                matches!(xpath.select(expression), Err(DecodeError::XPath { .. })),
                "{expression} should be rejected"
            );
        }
    }
}

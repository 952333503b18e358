//! Graph scoping for servers without a configurable default graph.
//!
//! This is a bounded text transform, not a SPARQL parser: it finds the root
//! group pattern of a `SELECT ... WHERE { }` by brace matching and wraps its
//! body in `GRAPH <uri> { }`. Anything it cannot recognize is returned as is.

use std::borrow::Cow;

/// Scope the root `WHERE` group of a SELECT query to `graph`.
///
/// Returns the input unchanged when the query is not a SELECT with a `WHERE`
/// keyword, when the root group already mentions `graph`, or when its braces
/// do not balance. Applying it to its own output is a no-op.
pub fn scope_to_graph<'a>(query: &'a str, graph: &str) -> Cow<'a, str> {
    // ASCII lowering keeps byte offsets aligned with `query`.
    let lower = query.to_ascii_lowercase();

    let Some(where_idx) = find_keyword(&lower, "where") else {
        return Cow::Borrowed(query);
    };
    if find_keyword(&lower[..where_idx], "select").is_none() {
        return Cow::Borrowed(query);
    }

    let Some(open_idx) = lower[where_idx..].find('{').map(|offset| where_idx + offset) else {
        return Cow::Borrowed(query);
    };

    if lower[open_idx..].contains("graph") {
        return Cow::Borrowed(query);
    }

    let Some(close_idx) = matching_brace(query.as_bytes(), open_idx) else {
        return Cow::Borrowed(query);
    };

    let mut scoped = String::with_capacity(query.len() + graph.len() + 16);
    scoped.push_str(&query[..=open_idx]);
    scoped.push_str(" GRAPH <");
    scoped.push_str(graph);
    scoped.push_str("> {");
    scoped.push_str(&query[open_idx + 1..close_idx]);
    scoped.push_str(" }");
    scoped.push_str(&query[close_idx..]);
    Cow::Owned(scoped)
}

/// Byte offset of the first standalone occurrence of `keyword` in `lower`.
fn find_keyword(lower: &str, keyword: &str) -> Option<usize> {
    let bytes = lower.as_bytes();
    lower.match_indices(keyword).map(|(idx, _)| idx).find(|&idx| {
        let before = idx.checked_sub(1).map(|i| bytes[i]);
        let after = bytes.get(idx + keyword.len()).copied();
        !before.is_some_and(is_word_byte) && !after.is_some_and(is_word_byte)
    })
}

fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'?' || byte == b'$' || byte == b':'
}

/// Offset of the `}` closing the `{` at `open_idx`, if the braces balance.
fn matching_brace(bytes: &[u8], open_idx: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, byte) in bytes.iter().enumerate().skip(open_idx) {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAPH: &str = "http://example.org/test";

    #[test]
    fn wraps_the_root_group() {
        let scoped = scope_to_graph("SELECT ?s ?p ?o WHERE { ?s ?p ?o }", GRAPH);
        assert_eq!(
            scoped,
            "SELECT ?s ?p ?o WHERE { GRAPH <http://example.org/test> { ?s ?p ?o  }}"
        );
    }

    #[test]
    fn nested_groups_stay_inside_the_wrapper() {
        let query = "select ?s ?name where { ?s a <http://ex/T> . OPTIONAL { ?s <http://ex/name> ?name } } LIMIT 10";
        let scoped = scope_to_graph(query, GRAPH);

        assert_eq!(
            scoped,
            "select ?s ?name where { GRAPH <http://example.org/test> { ?s a <http://ex/T> . OPTIONAL { ?s <http://ex/name> ?name }  }} LIMIT 10"
        );
        assert_eq!(scoped.matches("GRAPH <").count(), 1);
        assert!(scoped.ends_with("}  }} LIMIT 10"));
    }

    #[test]
    fn rewriting_is_idempotent() {
        let queries = [
            "SELECT ?s ?p ?o WHERE { ?s ?p ?o }",
            "SELECT * WHERE { ?s ?p ?o OPTIONAL { ?o ?q ?r } FILTER(?s != ?o) } ORDER BY ?s",
            "PREFIX ex: <http://ex/>\nSELECT ?s\nWHERE {\n  ?s ex:p ?o .\n}",
        ];
        for query in queries {
            let once = scope_to_graph(query, GRAPH).into_owned();
            assert_ne!(once, query);
            let twice = scope_to_graph(&once, GRAPH);
            assert_eq!(twice, once);
            assert!(matches!(twice, Cow::Borrowed(_)));
        }
    }

    #[test]
    fn already_scoped_queries_pass_through() {
        let query = "SELECT ?s WHERE { GRAPH <http://other> { ?s ?p ?o } }";
        assert!(matches!(scope_to_graph(query, GRAPH), Cow::Borrowed(q) if q == query));

        let lower = "select ?s where { graph ?g { ?s ?p ?o } }";
        assert_eq!(scope_to_graph(lower, GRAPH), lower);
    }

    #[test]
    fn non_select_queries_pass_through() {
        let queries = [
            "ASK WHERE { ?s ?p ?o }",
            "CONSTRUCT { ?s ?p ?o } WHERE { ?s ?p ?o }",
            "DELETE WHERE { ?s ?p ?o }",
            "SELECT * { ?s ?p ?o }",
            "DESCRIBE <http://ex/s>",
        ];
        for query in queries {
            assert_eq!(scope_to_graph(query, GRAPH), query);
        }
    }

    #[test]
    fn malformed_braces_pass_through() {
        let query = "SELECT ?s WHERE { ?s ?p ?o OPTIONAL { ?o ?q ?r }";
        assert_eq!(scope_to_graph(query, GRAPH), query);

        let no_brace = "SELECT ?s WHERE";
        assert_eq!(scope_to_graph(no_brace, GRAPH), no_brace);
    }

    #[test]
    fn keywords_inside_names_are_ignored() {
        // `?somewhere` is a variable, not the WHERE keyword.
        let query = "SELECT ?somewhere WHERE { ?somewhere ?p ?o }";
        assert_eq!(
            scope_to_graph(query, GRAPH),
            "SELECT ?somewhere WHERE { GRAPH <http://example.org/test> { ?somewhere ?p ?o  }}"
        );
    }
}

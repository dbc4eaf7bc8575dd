use proc_macro::{Delimiter, Group, TokenStream, TokenTree};

/// Marks a function as an objserver test.
///
/// The body runs inside a plain `#[test]` after test logging has been
/// installed, so `RUST_LOG=objserver=trace cargo test` shows the broker's
/// interest transitions and request traces for the failing test.
///
/// ```rust,ignore
/// #[objserver::test]
/// fn pipe_read_end_is_watched() {
///     // ...
/// }
/// ```
#[proc_macro_attribute]
pub fn test(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut tokens = item.into_iter().collect::<Vec<_>>();

    let block_pos = tokens.iter().rposition(
        |t| matches!(t, TokenTree::Group(g) if g.delimiter() == Delimiter::Brace),
    );

    let Some(pos) = block_pos else {
        return "compile_error!(\"#[objserver::test] expects a function body\");"
            .parse()
            .unwrap();
    };

    let block = match &tokens[pos] {
        TokenTree::Group(g) => g.stream().to_string(),
        _ => unreachable!(),
    };

    let new_block = format!(
        "{{
        let _ = ::env_logger::builder().is_test(true).try_init();
        {{ {} }}
    }}",
        block
    );

    let body = match new_block.parse::<TokenStream>() {
        Ok(ts) => ts,
        Err(err) => {
            let msg = format!("objserver::test macro error: {}", err);
            return format!("compile_error!(\"{}\");", msg).parse().unwrap();
        }
    };

    tokens[pos] = TokenTree::Group(Group::new(Delimiter::Brace, body));

    let test_attr: TokenStream = "#[test]".parse().unwrap();
    let mut result: Vec<TokenTree> = test_attr.into_iter().collect();
    result.extend(tokens);

    result.into_iter().collect()
}

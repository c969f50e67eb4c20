//! JavaScript snippets evaluated inside tabs and frames.

use crate::driver::Locator;

pub const READY_STATE: &str = "document.readyState";

pub const OUTER_HTML: &str =
    "document.documentElement ? document.documentElement.outerHTML : ''";

fn quote(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Expression yielding the located element or null
fn find(locator: &Locator) -> String {
    match locator {
        Locator::Css(selector) => format!("document.querySelector({})", quote(selector)),
        Locator::Text { container, labels } => {
            let labels = serde_json::to_string(labels).unwrap_or_else(|_| "[]".to_string());
            format!(
                "(Array.from(document.querySelectorAll({})).find(e => {}.some(l => (e.textContent || '').includes(l))) || null)",
                quote(container),
                labels
            )
        }
        Locator::ExactText { container, text } => format!(
            "(Array.from(document.querySelectorAll({})).find(e => (e.textContent || '').trim() === {}) || null)",
            quote(container),
            quote(text)
        ),
        Locator::Nth { container, index } => format!(
            "(document.querySelectorAll({})[{}] || null)",
            quote(container),
            index
        ),
    }
}

/// Returns `{present, visible}` for the located element
pub fn probe(locator: &Locator) -> String {
    format!(
        r#"(() => {{
    const el = {};
    if (!el) return {{ present: false, visible: false }};
    const style = window.getComputedStyle(el);
    const rect = el.getBoundingClientRect();
    const visible = style.visibility !== 'hidden' && style.display !== 'none' && (rect.width > 0 || rect.height > 0);
    return {{ present: true, visible }};
}})()"#,
        find(locator)
    )
}

/// Scrolls the located element into view and clicks it; evaluates to whether it existed
pub fn click(locator: &Locator) -> String {
    format!(
        r#"(() => {{
    const el = {};
    if (!el) return false;
    el.scrollIntoView({{ block: 'center' }});
    el.click();
    return true;
}})()"#,
        find(locator)
    )
}

/// Trimmed text content of every match
pub fn texts(selector: &str) -> String {
    format!(
        "Array.from(document.querySelectorAll({})).map(e => (e.textContent || '').trim())",
        quote(selector)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selectors_are_quoted() {
        let script = probe(&Locator::css("a[id=\"accionDescargar\"]"));
        assert!(script.contains(r#"document.querySelector("a[id=\"accionDescargar\"]")"#));
    }

    #[test]
    fn test_text_locator_embeds_labels() {
        let script = click(&Locator::Text {
            container: ".menuItem".to_string(),
            labels: vec!["Xerador".to_string(), "Generador".to_string()],
        });
        assert!(script.contains(r#"["Xerador","Generador"]"#));
        assert!(script.contains("el.click()"));
    }

    #[test]
    fn test_nth_locator_indexes_matches() {
        let script = click(&Locator::Nth {
            container: ".menuItem".to_string(),
            index: 5,
        });
        assert!(script.contains(r#"document.querySelectorAll(".menuItem")[5]"#));
    }
}

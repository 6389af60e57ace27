//! Client-script wire contract (§4.4, §6): a prebuilt JavaScript module (the
//! shared-worker coordination layer) is served read-only with two
//! placeholders string-replaced at serve time. The module's own contents are
//! opaque to this crate — only the placeholder substitution is specified.

const WORKER_PLACEHOLDER: &str = "__WS_WORKER_ROUTE__";
const ROUTE_PLACEHOLDER: &str = "__WS_ROUTE__";

/// Substitute the worker-route and upgrade-route placeholders into a
/// template asset. Both placeholders may appear any number of times (or not
/// at all); unmatched occurrences of either marker are left untouched.
pub fn render_client_script(template: &str, ws_route: &str, worker_route: &str) -> String {
    template.replace(WORKER_PLACEHOLDER, worker_route).replace(ROUTE_PLACEHOLDER, ws_route)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_both_placeholders() {
        let template = "connect(__WS_ROUTE__); worker(__WS_WORKER_ROUTE__);";
        let rendered = render_client_script(template, "/ws", "/ws-worker.js");
        assert_eq!(rendered, "connect(/ws); worker(/ws-worker.js);");
    }

    #[test]
    fn leaves_template_without_placeholders_unchanged() {
        let template = "no placeholders here";
        assert_eq!(render_client_script(template, "/ws", "/ws-worker.js"), template);
    }
}

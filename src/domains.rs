//! DevTools protocol domains toggled before navigation.
//!
//! The sequence is data: [`domain_plan`] returns the ordered list and
//! [`Domain::apply`] executes one entry, so adding or dropping a domain never
//! touches the orchestrator's control flow.

use chromiumoxide::cdp::browser_protocol::{
    css, dom, inspector, layer_tree, log, network, overlay, page, performance,
};
use chromiumoxide::cdp::js_protocol::{debugger, heap_profiler, profiler};
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Debugger,
    HeapProfiler,
    Inspector,
    LayerTree,
    Log,
    Overlay,
    Performance,
    Profiler,
    Network,
    Page,
    Dom,
    Css,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Toggle {
    Enable,
    Disable,
}

/// Domains that only add overhead and event noise to a capture.
pub const DISABLED_DOMAINS: &[Domain] = &[
    Domain::Debugger,
    Domain::HeapProfiler,
    Domain::Inspector,
    Domain::LayerTree,
    Domain::Log,
    Domain::Overlay,
    Domain::Performance,
    Domain::Profiler,
];

/// Domains a capture depends on. DOM must precede CSS.
pub const ENABLED_DOMAINS: &[Domain] = &[Domain::Page, Domain::Dom, Domain::Css];

/// The ordered toggles for one capture.
///
/// Network is only enabled when the network idle signal is wanted.
pub fn domain_plan(network_idle: bool) -> Vec<(Domain, Toggle)> {
    let network = if network_idle {
        Toggle::Enable
    } else {
        Toggle::Disable
    };

    DISABLED_DOMAINS
        .iter()
        .map(|&domain| (domain, Toggle::Disable))
        .chain(std::iter::once((Domain::Network, network)))
        .chain(ENABLED_DOMAINS.iter().map(|&domain| (domain, Toggle::Enable)))
        .collect()
}

macro_rules! toggle {
    ($page:expr, $toggle:expr, $domain:ident) => {
        match $toggle {
            Toggle::Enable => $page
                .execute($domain::EnableParams::default())
                .await
                .map(drop),
            Toggle::Disable => $page
                .execute($domain::DisableParams::default())
                .await
                .map(drop),
        }
    };
}

impl Domain {
    pub async fn apply(self, page: &Page, toggle: Toggle) -> Result<(), CdpError> {
        match self {
            Domain::Debugger => toggle!(page, toggle, debugger),
            Domain::HeapProfiler => toggle!(page, toggle, heap_profiler),
            Domain::Inspector => toggle!(page, toggle, inspector),
            Domain::LayerTree => toggle!(page, toggle, layer_tree),
            Domain::Log => toggle!(page, toggle, log),
            Domain::Overlay => toggle!(page, toggle, overlay),
            Domain::Performance => toggle!(page, toggle, performance),
            Domain::Profiler => toggle!(page, toggle, profiler),
            Domain::Network => toggle!(page, toggle, network),
            Domain::Page => toggle!(page, toggle, page),
            Domain::Dom => toggle!(page, toggle, dom),
            Domain::Css => toggle!(page, toggle, css),
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Domain::Debugger => "Debugger",
            Domain::HeapProfiler => "Heap Profiler",
            Domain::Inspector => "Inspector",
            Domain::LayerTree => "Layer Tree",
            Domain::Log => "Log",
            Domain::Overlay => "Overlay",
            Domain::Performance => "Performance",
            Domain::Profiler => "Profiler",
            Domain::Network => "Network",
            Domain::Page => "Page",
            Domain::Dom => "DOM",
            Domain::Css => "CSS",
        })
    }
}

impl fmt::Display for Toggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Toggle::Enable => "enable",
            Toggle::Disable => "disable",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_disables_before_enabling() {
        let plan = domain_plan(true);
        let first_enable = plan
            .iter()
            .position(|(_, toggle)| *toggle == Toggle::Enable)
            .unwrap();

        assert!(plan[..first_enable]
            .iter()
            .all(|(_, toggle)| *toggle == Toggle::Disable));
        assert_eq!(first_enable, DISABLED_DOMAINS.len());
    }

    #[test]
    fn test_network_follows_idle_setting() {
        assert!(domain_plan(true).contains(&(Domain::Network, Toggle::Enable)));
        assert!(domain_plan(false).contains(&(Domain::Network, Toggle::Disable)));
        assert!(!domain_plan(false).contains(&(Domain::Network, Toggle::Enable)));
    }

    #[test]
    fn test_every_domain_toggled_once() {
        let plan = domain_plan(false);
        assert_eq!(plan.len(), 12);
        for (i, (domain, _)) in plan.iter().enumerate() {
            assert!(!plan[i + 1..].iter().any(|(d, _)| d == domain));
        }
    }

    #[test]
    fn test_dom_precedes_css() {
        let plan = domain_plan(true);
        let dom = plan.iter().position(|(d, _)| *d == Domain::Dom).unwrap();
        let css = plan.iter().position(|(d, _)| *d == Domain::Css).unwrap();
        assert!(dom < css);
        assert_eq!(plan.last(), Some(&(Domain::Css, Toggle::Enable)));
    }
}

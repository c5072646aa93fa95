use anyhow::Result;

use super::page::{Element, PageDom};

/// Extra condition on top of "visible".
#[derive(Debug, Clone, Copy)]
pub enum Matcher {
    Any,
    Enabled,
    TextContains(&'static [&'static str]),
    HrefContains(&'static [&'static str]),
}

/// One named element-finding strategy: a CSS query plus a filter over the
/// returned snapshots.
#[derive(Debug, Clone, Copy)]
pub struct Locator {
    pub name: &'static str,
    pub css: &'static str,
    pub matcher: Matcher,
}

impl Locator {
    pub const fn new(name: &'static str, css: &'static str, matcher: Matcher) -> Self {
        Self { name, css, matcher }
    }

    /// First visible element satisfying the matcher.
    pub fn pick<'a>(&self, elements: &'a [Element]) -> Option<&'a Element> {
        elements.iter().find(|el| el.visible && self.accepts(el))
    }

    fn accepts(&self, el: &Element) -> bool {
        match self.matcher {
            Matcher::Any => true,
            Matcher::Enabled => !el.disabled,
            Matcher::TextContains(needles) => {
                let text = el.text_lower();
                needles.iter().any(|n| text.contains(n))
            }
            Matcher::HrefContains(needles) => el
                .href
                .as_deref()
                .is_some_and(|href| needles.iter().any(|n| href.contains(n))),
        }
    }
}

/// Tries each locator in order; the first one yielding an element wins.
pub async fn locate(
    page: &dyn PageDom,
    locators: &[Locator],
) -> Result<Option<(&'static str, Element)>> {
    for locator in locators {
        let elements = page.query(locator.css).await?;
        if let Some(found) = locator.pick(&elements) {
            return Ok(Some((locator.name, found.clone())));
        }
    }
    Ok(None)
}

pub const LOGIN_BUTTON: &[Locator] = &[
    Locator::new(
        "login-text",
        "button, a",
        Matcher::TextContains(&["iniciar sesión", "iniciar sesion"]),
    ),
    Locator::new("login-href", "a", Matcher::HrefContains(&["auth", "heimdall"])),
];

pub const FEDERATED_BUTTON: &[Locator] = &[
    Locator::new("federated-id", "#zocial-oidc", Matcher::Any),
    Locator::new("federated-class", ".zocial.oidc", Matcher::Any),
    Locator::new(
        "federated-text",
        "a, button, div",
        Matcher::TextContains(&["clave única", "clave unica", "gobierno de chile"]),
    ),
    Locator::new("federated-href", "a", Matcher::HrefContains(&["claveunica"])),
];

pub const USERNAME_INPUT: Locator = Locator::new("username", "#uname", Matcher::Any);
pub const PASSWORD_INPUT: Locator = Locator::new("password", "#pword", Matcher::Any);

pub const SUBMIT_BUTTON: &[Locator] = &[
    Locator::new("submit-id", "#login-submit", Matcher::Enabled),
    Locator::new("submit-button", r#"button[type="submit"]"#, Matcher::Enabled),
    Locator::new("submit-input", r#"input[type="submit"]"#, Matcher::Enabled),
    Locator::new("submit-login-id", r#"button[id*="login"]"#, Matcher::Enabled),
    Locator::new("submit-submit-id", r#"button[id*="submit"]"#, Matcher::Enabled),
];

pub const LOGIN_ERROR: Locator =
    Locator::new("login-error", ".gob-response-error, .error", Matcher::Any);

pub const ORGANIZATION_RADIOS: &str = r#"input[type="radio"][name="grupoOrg"]"#;

pub const CONFIRM_BUTTON: &[Locator] = &[
    Locator::new(
        "confirm-known",
        r#"a.btn.btn-pri[onclick*="SeleccionarPorOrganizacionSSO"]"#,
        Matcher::Any,
    ),
    Locator::new(
        "confirm-footer",
        ".modal-footer button, .modal-footer a",
        Matcher::TextContains(&["ingresar", "confirmar"]),
    ),
    Locator::new("confirm-onclick", r#"[onclick*="Seleccionar"]"#, Matcher::Any),
];

pub const FIRST_FORM: &str = "form";

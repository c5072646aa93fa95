use crate::core::automation::organization::{OrganizationError, resolve_organization};

fn labels(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn single_match_is_selected_without_warning() {
    let options = labels(&["Hospital Sur", "Farmacia Central", "Bodega Norte"]);
    let choice = resolve_organization(&options, "FARMACIA").unwrap();
    assert_eq!(choice.index, 1);
    assert_eq!(choice.label, "Farmacia Central");
    assert_eq!(choice.match_count, 1);
    assert!(choice.warning.is_none());
}

#[test]
fn no_match_names_the_term_and_the_options() {
    let options = labels(&["Hospital Sur", "Bodega Norte"]);
    let err = resolve_organization(&options, "Farmacia").unwrap_err();
    assert_eq!(
        err,
        OrganizationError::NoMatch {
            term: "farmacia".into(),
            available: options.clone(),
        }
    );
    let message = err.to_string();
    assert!(message.contains("farmacia"));
    assert!(message.contains("Hospital Sur"));
    assert!(message.contains("Bodega Norte"));
}

#[test]
fn several_matches_pick_the_longest_label() {
    let options = labels(&["Farmacia Central", "Farmacia Central Norte"]);
    let choice = resolve_organization(&options, "farmacia central").unwrap();
    assert_eq!(choice.label, "Farmacia Central Norte");
    assert_eq!(choice.index, 1);
    assert_eq!(choice.match_count, 2);
    assert!(choice.warning.unwrap().contains('2'));
}

#[test]
fn equal_lengths_keep_the_first_option() {
    let options = labels(&["Farmacia Uno", "Farmacia Dos"]);
    let choice = resolve_organization(&options, "farmacia").unwrap();
    assert_eq!(choice.index, 0);
}

#[test]
fn blank_term_is_rejected() {
    let options = labels(&["Farmacia Central"]);
    assert_eq!(
        resolve_organization(&options, "   "),
        Err(OrganizationError::MissingTerm)
    );
}

/// The option chosen for a search term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationChoice {
    /// Position in the option list as rendered.
    pub index: usize,
    pub label: String,
    pub match_count: usize,
    /// Set when more than one option matched.
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrganizationError {
    #[error("no organization matches \"{term}\"; available: {}", available.join(", "))]
    NoMatch { term: String, available: Vec<String> },

    #[error("the business payload carries no organization name to search for")]
    MissingTerm,
}

/// Picks the option whose label contains `term` (case-insensitive).
///
/// Several matches resolve to the longest label, the more qualified name;
/// equal lengths keep the earlier option. The ambiguity is reported in
/// `warning` so the caller can surface it.
pub fn resolve_organization(
    labels: &[String],
    term: &str,
) -> Result<OrganizationChoice, OrganizationError> {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return Err(OrganizationError::MissingTerm);
    }

    let matches: Vec<(usize, &String)> = labels
        .iter()
        .enumerate()
        .filter(|(_, label)| label.to_lowercase().contains(&needle))
        .collect();

    let Some(&(first_index, first_label)) = matches.first() else {
        return Err(OrganizationError::NoMatch {
            term: needle,
            available: labels.to_vec(),
        });
    };

    let (index, label) = matches
        .iter()
        .skip(1)
        .fold((first_index, first_label), |best, &(i, label)| {
            if label.chars().count() > best.1.chars().count() {
                (i, label)
            } else {
                best
            }
        });

    let warning = (matches.len() > 1).then(|| {
        format!(
            "{} organizations match \"{}\"; picked the most specific: \"{}\"",
            matches.len(),
            needle,
            label
        )
    });

    Ok(OrganizationChoice {
        index,
        label: label.clone(),
        match_count: matches.len(),
        warning,
    })
}

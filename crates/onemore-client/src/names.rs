/// Default participant names, picked in order as slots are added.
pub const NAME_POOL: [&str; 20] = [
    "Panda", "Mariposa", "Tigre", "Caballo", "Leopardo", "Lémur", "Elefante", "Jirafa", "León",
    "Oso", "Lobo", "Zorro", "Conejo", "Ardilla", "Delfín", "Ballena", "Tiburón", "Águila", "Búho",
    "Colibrí",
];

/// Next unused pool name given the names already in the session.
///
/// The base name is chosen by how many participants exist; if it is taken a
/// numeric suffix is appended (`Oso 1`, `Oso 2`, ...).
pub fn next_name<S: AsRef<str>>(existing: &[S]) -> String {
    let base = NAME_POOL[existing.len() % NAME_POOL.len()];
    let taken = |candidate: &str| existing.iter().any(|n| n.as_ref() == candidate);

    if !taken(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{} {}", base, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

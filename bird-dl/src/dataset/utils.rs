use crate::common::*;

/// Load a class list with one class name per line.
pub fn load_classes_file(path: impl AsRef<Path>) -> Result<IndexSet<String>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read classes file '{}'", path.display()))?;
    let lines: Vec<_> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let classes: IndexSet<_> = lines.iter().cloned().map(ToOwned::to_owned).collect();
    ensure!(
        lines.len() == classes.len(),
        "duplicated class names found in '{}'",
        path.display()
    );
    ensure!(
        !classes.is_empty(),
        "no classes found in '{}'",
        path.display()
    );
    Ok(classes)
}

/// List the regular files in a directory, sorted by path.
pub fn list_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut paths = fs::read_dir(dir)
        .with_context(|| format!("failed to list directory '{}'", dir.display()))?
        .map(|entry| -> Result<_> {
            let entry = entry?;
            let is_file = entry.file_type()?.is_file();
            Ok(is_file.then(|| entry.path()))
        })
        .filter_map(|result| result.transpose())
        .collect::<Result<Vec<_>>>()?;
    paths.sort();
    Ok(paths)
}

/// List the names of the immediate subdirectories, sorted alphabetically.
pub fn list_subdirs(dir: impl AsRef<Path>) -> Result<Vec<String>> {
    let dir = dir.as_ref();
    let mut names = vec![];

    for entry in fs::read_dir(dir)
        .with_context(|| format!("failed to list directory '{}'", dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(name) => warn!("ignore non-unicode directory name {:?}", name),
        }
    }

    names.sort();
    Ok(names)
}

/// The class label of a sample, which is the name of its parent directory.
pub fn class_name_of(path: &Path) -> Option<&str> {
    path.parent()?.file_name()?.to_str()
}

//! Marker handlers: one per property role, in priority order.
//!
//! A handler recognizes its marker on a discovered property and attaches the
//! corresponding behavior: a shape check run during validation, and a
//! registration installing the property as a declared input or output on the
//! constructed instance.
use camino::{Utf8Path, Utf8PathBuf};

use crate::error::StructuralError;
use crate::model::{Marker, Value};
use crate::property::{AttachContext, ShapeCheck};
use crate::task::PathTransform;

pub(crate) trait MarkerHandler: Send + Sync {
    fn marker(&self) -> Marker;

    fn attach(&self, context: &mut AttachContext<'_>) -> Result<(), StructuralError>;
}

/// Whether a path-valued property feeds the task or is produced by it.
#[derive(Clone, Copy)]
enum Direction {
    Input,
    Output,
}

struct PathHandler {
    marker: Marker,
    direction: Direction,
    transform: PathTransform,
    check: Option<ShapeCheck>,
}

impl MarkerHandler for PathHandler {
    fn marker(&self) -> Marker {
        self.marker
    }

    fn attach(&self, context: &mut AttachContext<'_>) -> Result<(), StructuralError> {
        if let Some(check) = self.check {
            context.shape_check(check);
        }
        match self.direction {
            Direction::Input => context.register_input_files(self.transform),
            Direction::Output => context.register_output_files(self.transform),
        }
        Ok(())
    }
}

struct InputValueHandler;

impl MarkerHandler for InputValueHandler {
    fn marker(&self) -> Marker {
        Marker::Input
    }

    fn attach(&self, context: &mut AttachContext<'_>) -> Result<(), StructuralError> {
        context.register_input_value();
        Ok(())
    }
}

struct NestedHandler;

impl MarkerHandler for NestedHandler {
    fn marker(&self) -> Marker {
        Marker::Nested
    }

    fn attach(&self, context: &mut AttachContext<'_>) -> Result<(), StructuralError> {
        context.walk_nested()
    }
}

static INPUT_FILE: PathHandler = PathHandler {
    marker: Marker::InputFile,
    direction: Direction::Input,
    transform: single_path,
    check: Some(check_input_file),
};
static INPUT_DIRECTORY: PathHandler = PathHandler {
    marker: Marker::InputDirectory,
    direction: Direction::Input,
    transform: single_path,
    check: Some(check_input_directory),
};
static INPUT_FILES: PathHandler = PathHandler {
    marker: Marker::InputFiles,
    direction: Direction::Input,
    transform: path_collection,
    check: None,
};
static OUTPUT_FILE: PathHandler = PathHandler {
    marker: Marker::OutputFile,
    direction: Direction::Output,
    transform: single_path,
    check: Some(check_output_file),
};
static OUTPUT_FILES: PathHandler = PathHandler {
    marker: Marker::OutputFiles,
    direction: Direction::Output,
    transform: path_collection,
    check: Some(check_output_file),
};
static OUTPUT_DIRECTORY: PathHandler = PathHandler {
    marker: Marker::OutputDirectory,
    direction: Direction::Output,
    transform: single_path,
    check: Some(check_output_directory),
};
static OUTPUT_DIRECTORIES: PathHandler = PathHandler {
    marker: Marker::OutputDirectories,
    direction: Direction::Output,
    transform: path_collection,
    check: Some(check_output_directory),
};

static HANDLERS: [&dyn MarkerHandler; 9] = [
    &INPUT_FILE,
    &INPUT_DIRECTORY,
    &INPUT_FILES,
    &OUTPUT_FILE,
    &OUTPUT_FILES,
    &OUTPUT_DIRECTORY,
    &OUTPUT_DIRECTORIES,
    &InputValueHandler,
    &NestedHandler,
];

/// All registered handlers, in the order they are consulted.
pub(crate) fn handlers() -> &'static [&'static dyn MarkerHandler] {
    &HANDLERS
}

fn single_path(value: &Value) -> Vec<Utf8PathBuf> {
    match value {
        Value::Path(path) => vec![path.clone()],
        _ => Vec::new(),
    }
}

fn path_collection(value: &Value) -> Vec<Utf8PathBuf> {
    value.as_paths().to_vec()
}

fn check_input_file(property: &str, value: &Value, messages: &mut Vec<String>) {
    for path in value.as_paths() {
        if !path.exists() {
            messages.push(format!(
                "File '{path}' specified for property '{property}' does not exist."
            ));
        } else if !path.is_file() {
            messages.push(format!(
                "File '{path}' specified for property '{property}' is not a file."
            ));
        }
    }
}

fn check_input_directory(property: &str, value: &Value, messages: &mut Vec<String>) {
    for path in value.as_paths() {
        if !path.exists() {
            messages.push(format!(
                "Directory '{path}' specified for property '{property}' does not exist."
            ));
        } else if !path.is_dir() {
            messages.push(format!(
                "Directory '{path}' specified for property '{property}' is not a directory."
            ));
        }
    }
}

/// The nearest existing ancestor which is not a directory, if any. Creating
/// the output would fail under such an ancestor.
fn blocking_ancestor(path: &Utf8Path) -> Option<&Utf8Path> {
    path.ancestors()
        .skip(1)
        .find(|ancestor| ancestor.exists())
        .filter(|ancestor| !ancestor.is_dir())
}

fn check_output_file(property: &str, value: &Value, messages: &mut Vec<String>) {
    for path in value.as_paths() {
        if path.is_dir() {
            messages.push(format!(
                "Cannot write to file '{path}' specified for property '{property}' as it is a directory."
            ));
        } else if let Some(ancestor) = blocking_ancestor(path) {
            messages.push(format!(
                "Cannot write to file '{path}' specified for property '{property}' as ancestor '{ancestor}' is not a directory."
            ));
        }
    }
}

fn check_output_directory(property: &str, value: &Value, messages: &mut Vec<String>) {
    for path in value.as_paths() {
        if path.exists() && !path.is_dir() {
            messages.push(format!(
                "Directory '{path}' specified for property '{property}' is not a directory."
            ));
        } else if !path.exists()
            && let Some(ancestor) = blocking_ancestor(path)
        {
            messages.push(format!(
                "Cannot write to directory '{path}' specified for property '{property}' as ancestor '{ancestor}' is not a directory."
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf8(path: &std::path::Path) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
    }

    #[test]
    fn handlers_are_consulted_in_declaration_order() {
        let markers: Vec<_> = handlers().iter().map(|handler| handler.marker()).collect();
        assert_eq!(
            markers,
            [
                Marker::InputFile,
                Marker::InputDirectory,
                Marker::InputFiles,
                Marker::OutputFile,
                Marker::OutputFiles,
                Marker::OutputDirectory,
                Marker::OutputDirectories,
                Marker::Input,
                Marker::Nested,
            ]
        );
    }

    #[test]
    fn missing_input_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = utf8(&dir.path().join("absent.txt"));

        let mut messages = Vec::new();
        check_input_file("config", &Value::Path(path.clone()), &mut messages);
        assert_eq!(
            messages,
            [format!(
                "File '{path}' specified for property 'config' does not exist."
            )]
        );
    }

    #[test]
    fn directory_passed_as_input_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = utf8(dir.path());

        let mut messages = Vec::new();
        check_input_file("config", &Value::Path(path.clone()), &mut messages);
        assert_eq!(
            messages,
            [format!(
                "File '{path}' specified for property 'config' is not a file."
            )]
        );
    }

    #[test]
    fn existing_input_directory_passes() {
        let dir = tempfile::tempdir().unwrap();
        let mut messages = Vec::new();
        check_input_directory("sources", &Value::Path(utf8(dir.path())), &mut messages);
        assert!(messages.is_empty());
    }

    #[test]
    fn output_file_under_a_file_ancestor_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let path = utf8(&blocker.join("out.txt"));
        let ancestor = utf8(&blocker);

        let mut messages = Vec::new();
        check_output_file("dest", &Value::Path(path.clone()), &mut messages);
        assert_eq!(
            messages,
            [format!(
                "Cannot write to file '{path}' specified for property 'dest' as ancestor '{ancestor}' is not a directory."
            )]
        );
    }

    #[test]
    fn output_directory_colliding_with_a_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("taken");
        std::fs::write(&file, b"x").unwrap();
        let path = utf8(&file);

        let mut messages = Vec::new();
        check_output_directory("dest_dir", &Value::Path(path.clone()), &mut messages);
        assert_eq!(
            messages,
            [format!(
                "Directory '{path}' specified for property 'dest_dir' is not a directory."
            )]
        );
    }

    #[test]
    fn nonexistent_output_paths_under_directories_pass() {
        let dir = tempfile::tempdir().unwrap();
        let path = utf8(&dir.path().join("deep/out.txt"));

        let mut messages = Vec::new();
        check_output_file("dest", &Value::Path(path), &mut messages);
        assert!(messages.is_empty());
    }

    #[test]
    fn collection_values_check_every_path() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.txt");
        std::fs::write(&present, b"x").unwrap();
        let absent = utf8(&dir.path().join("b.txt"));

        let value = Value::Paths(vec![utf8(&present), absent.clone()]);
        assert_eq!(path_collection(&value).len(), 2);
    }

    #[test]
    fn transforms_ignore_non_path_values() {
        let scalar = Value::Scalar(serde_json::json!(42));
        assert!(single_path(&scalar).is_empty());
        assert!(path_collection(&scalar).is_empty());
    }
}

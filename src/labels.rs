use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

/// Maps model class indices to display names.
#[derive(Debug, Clone, Default)]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    pub fn from_file(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        load_labels(io::BufReader::new(file)).map(Self::new)
    }

    /// Falls back to `Class: <id>` for unknown ids.
    pub fn label_for(&self, class_id: usize) -> String {
        self.labels
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("Class: {}", class_id))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

pub fn load_labels(reader: impl BufRead) -> io::Result<Vec<String>> {
    let mut labels = Vec::new();

    for (line_number, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        let label = line.trim();
        if label.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Empty label on line {}", line_number + 1),
            ));
        }
        labels.push(label.to_string());
    }

    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_load_labels() {
        let labels = load_labels(Cursor::new("A\n B \nC")).unwrap();
        assert_eq!(labels, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_load_labels_rejects_blank_line() {
        let err = load_labels(Cursor::new("A\n\nC\n")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_label_for_falls_back_to_class_id() {
        let labels = LabelSet::new(vec!["Hello".to_string()]);
        assert_eq!(labels.label_for(0), "Hello");
        assert_eq!(labels.label_for(4), "Class: 4");
        assert_eq!(LabelSet::default().label_for(2), "Class: 2");
    }

    #[test]
    fn test_from_missing_file() {
        assert!(LabelSet::from_file(Path::new("./no/such/labels.txt")).is_err());
    }
}

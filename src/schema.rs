#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    pub tables: Vec<Table>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: String,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }

    /// `name (type)`, the form columns take inside a prompt.
    pub fn descriptor(&self) -> String {
        format!("{} ({})", self.name, self.data_type)
    }
}

impl Schema {
    pub fn to_prompt_string(&self) -> String {
        let mut output = String::new();

        for table in &self.tables {
            let columns: Vec<String> = table.columns.iter().map(Column::descriptor).collect();
            output.push_str(&format!("{} columns: {}\n", table.name, columns.join(", ")));
        }

        output
    }
}

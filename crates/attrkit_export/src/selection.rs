//! Console field checklist.

use attrkit_io_layer::SpecFieldDescriptor;

/// Ordered field list with per-field selection flags.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecFieldSelection {
    fields: Vec<SpecFieldDescriptor>,
}

impl SpecFieldSelection {
    /// Checklist over probed fields, every field selected.
    pub fn from_fields(fields: Vec<SpecFieldDescriptor>) -> Self {
        let fields = fields
            .into_iter()
            .map(|field| SpecFieldDescriptor {
                if_selected: true,
                ..field
            })
            .collect();
        Self { fields }
    }

    pub fn fields(&self) -> &[SpecFieldDescriptor] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn select_all(&mut self) {
        self.fields.iter_mut().for_each(|field| field.if_selected = true);
    }

    pub fn select_none(&mut self) {
        self.fields.iter_mut().for_each(|field| field.if_selected = false);
    }

    /// Set one field's flag. Returns `false` when `name` is unknown.
    pub fn set_selected(&mut self, name: &str, if_selected: bool) -> bool {
        match self.fields.iter_mut().find(|field| field.name == name) {
            Some(field) => {
                field.if_selected = if_selected;
                true
            }
            None => false,
        }
    }

    /// Flip one field's flag and return the new value.
    pub fn toggle(&mut self, name: &str) -> Option<bool> {
        let field = self.fields.iter_mut().find(|field| field.name == name)?;
        field.if_selected = !field.if_selected;
        Some(field.if_selected)
    }

    /// Selected field names in display order.
    pub fn selected_names(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|field| field.if_selected)
            .map(|field| field.name.clone())
            .collect()
    }

    pub fn n_selected(&self) -> usize {
        self.fields.iter().filter(|field| field.if_selected).count()
    }
}

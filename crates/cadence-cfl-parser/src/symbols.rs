//! The static symbol table threaded through parsing.
//!
//! Frames mirror the runtime scope wrappers one-for-one: the host scope
//! (seeded from an optional [`ScopeLayout`]) sits at the bottom, and
//! every `where`, `let`, lambda argument list, loop body, and
//! comprehension pushes a frame on top. An identifier resolving to a
//! frame entry becomes a `(frames_up, index)` slot reference; names the
//! table cannot see stay dynamic string lookups.
//!
//! Lambda argument frames are *boundaries*: a resolution that crosses
//! one is rewritten into a capture slot in the crossed frame, so the
//! runtime function value can snapshot the captured values when the
//! lambda is created instead of holding a live reference into the
//! enclosing scope. Captures registered this way accumulate at the end
//! of the boundary frame, after the parameters and the self slot.

use cadence_cfl_ast::{ScopeLayout, SlotRef, Type};

/// How a frame participates in capture analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Transparent scope wrapper (`where`, `let`, loops, comprehensions,
    /// the host layout).
    Plain,
    /// A lambda argument frame; resolutions crossing it become captures.
    Boundary,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub ty: Type,
    /// For captures: the slot the value comes from, relative to the
    /// scope enclosing the boundary frame.
    pub outer: Option<SlotRef>,
}

#[derive(Debug)]
pub struct Frame {
    pub kind: FrameKind,
    pub has_slots: bool,
    /// For boundary frames: how many leading entries are parameters.
    /// Entry `params` is the function itself; later entries are captures.
    pub params: usize,
    pub entries: Vec<Entry>,
}

/// How an identifier resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Slot-addressable at the given frame walk.
    Slot(SlotRef, Type),
    /// Known name, but the owning scope answers by string only.
    Dynamic(Type),
    /// Not declared anywhere the table can see.
    Unknown,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    frames: Vec<Frame>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the bottom frame from the host scope description.
    pub fn from_layout(layout: Option<&ScopeLayout>, host_slots: bool) -> Self {
        let mut table = Self::new();
        if let Some(layout) = layout {
            let entries = (0..layout.len() as u16)
                .filter_map(|slot| layout.entry(slot))
                .map(|e| Entry {
                    name: e.name.clone(),
                    ty: e.ty.clone(),
                    outer: None,
                })
                .collect();
            table.frames.push(Frame {
                kind: FrameKind::Plain,
                has_slots: host_slots,
                params: 0,
                entries,
            });
        }
        table
    }

    pub fn has_host_frame(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Push a transparent frame of named slots.
    pub fn push_frame(&mut self, names: impl IntoIterator<Item = (String, Type)>) {
        self.frames.push(Frame {
            kind: FrameKind::Plain,
            has_slots: true,
            params: 0,
            entries: names
                .into_iter()
                .map(|(name, ty)| Entry {
                    name,
                    ty,
                    outer: None,
                })
                .collect(),
        });
    }

    /// Push a lambda boundary frame: parameters, then the self entry.
    pub fn push_boundary(
        &mut self,
        params: impl IntoIterator<Item = (String, Type)>,
        self_name: String,
        self_ty: Type,
    ) {
        let mut entries: Vec<Entry> = params
            .into_iter()
            .map(|(name, ty)| Entry {
                name,
                ty,
                outer: None,
            })
            .collect();
        let params = entries.len();
        entries.push(Entry {
            name: self_name,
            ty: self_ty,
            outer: None,
        });
        self.frames.push(Frame {
            kind: FrameKind::Boundary,
            has_slots: true,
            params,
            entries,
        });
    }

    /// Pop the innermost frame, returning it for capture extraction.
    ///
    /// # Panics
    ///
    /// Panics if no frame was pushed.
    pub fn pop_frame(&mut self) -> Frame {
        self.frames.pop().expect("symbol frame underflow")
    }

    /// The captures accumulated in a popped boundary frame:
    /// `(name, outer slot, type)` in slot order.
    pub fn captures_of(frame: &Frame) -> Vec<(String, SlotRef, Type)> {
        frame.entries[frame.params + 1..]
            .iter()
            .map(|e| {
                (
                    e.name.clone(),
                    e.outer.expect("capture entries always carry their source"),
                    e.ty.clone(),
                )
            })
            .collect()
    }

    /// Append one slot to the innermost frame (a `let` binding).
    pub fn append_slot(&mut self, name: String, ty: Type) {
        if let Some(frame) = self.frames.last_mut() {
            frame.entries.push(Entry {
                name,
                ty,
                outer: None,
            });
        }
    }

    /// Resolve an identifier from the innermost frame outward,
    /// registering captures where the walk crosses a lambda boundary.
    pub fn resolve(&mut self, name: &str) -> Resolution {
        self.resolve_below(self.frames.len(), name)
    }

    fn resolve_below(&mut self, top: usize, name: &str) -> Resolution {
        let mut up: u16 = 0;
        for idx in (0..top).rev() {
            let frame = &self.frames[idx];
            if let Some(pos) = frame.entries.iter().rposition(|e| e.name == name) {
                let ty = frame.entries[pos].ty.clone();
                return if frame.has_slots {
                    Resolution::Slot(
                        SlotRef {
                            frames_up: up,
                            index: pos as u16,
                        },
                        ty,
                    )
                } else {
                    Resolution::Dynamic(ty)
                };
            }
            if frame.kind == FrameKind::Boundary {
                // the name lives (if anywhere) outside this lambda
                return match self.resolve_below(idx, name) {
                    Resolution::Slot(outer, ty) => {
                        let frame = &mut self.frames[idx];
                        let pos = frame.entries.len();
                        frame.entries.push(Entry {
                            name: name.to_string(),
                            ty: ty.clone(),
                            outer: Some(outer),
                        });
                        Resolution::Slot(
                            SlotRef {
                                frames_up: up,
                                index: pos as u16,
                            },
                            ty,
                        )
                    }
                    other => other,
                };
            }
            up += 1;
        }
        Resolution::Unknown
    }

    /// Look a name up without registering captures, for narrowing and
    /// diagnostics.
    pub fn peek(&self, name: &str) -> Option<(usize, usize, &Type)> {
        for idx in (0..self.frames.len()).rev() {
            let frame = &self.frames[idx];
            if let Some(pos) = frame.entries.iter().rposition(|e| e.name == name) {
                return Some((idx, pos, &frame.entries[pos].ty));
            }
            if frame.kind == FrameKind::Boundary {
                return None;
            }
        }
        None
    }

    /// Narrow a visible entry's static type, returning what must be
    /// passed to [`SymbolTable::restore`] afterwards.
    pub fn narrow(&mut self, name: &str, ty: Type) -> Option<(usize, usize, Type)> {
        let (frame, entry, _) = self.peek(name)?;
        let old = std::mem::replace(&mut self.frames[frame].entries[entry].ty, ty);
        Some((frame, entry, old))
    }

    pub fn restore(&mut self, saved: impl IntoIterator<Item = (usize, usize, Type)>) {
        for (frame, entry, ty) in saved {
            if let Some(slot) = self
                .frames
                .get_mut(frame)
                .and_then(|f| f.entries.get_mut(entry))
            {
                slot.ty = ty;
            }
        }
    }

    /// Set the innermost visible entry's type in place (comprehension
    /// generators refine their element types as clauses parse).
    pub fn set_type(&mut self, name: &str, ty: Type) {
        if let Some((frame, entry, _)) = self.peek(name) {
            self.frames[frame].entries[entry].ty = ty;
        }
    }

    /// Every name currently visible, for unknown-identifier suggestions.
    pub fn visible_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for frame in self.frames.iter().rev() {
            names.extend(frame.entries.iter().map(|e| e.name.clone()));
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_frames_stack_up() {
        let mut table = SymbolTable::new();
        table.push_frame([("a".to_string(), Type::int())]);
        table.push_frame([("b".to_string(), Type::string())]);
        match table.resolve("a") {
            Resolution::Slot(slot, ty) => {
                assert_eq!((slot.frames_up, slot.index), (1, 0));
                assert_eq!(ty, Type::int());
            }
            other => panic!("expected slot, got {other:?}"),
        }
        match table.resolve("b") {
            Resolution::Slot(slot, _) => assert_eq!((slot.frames_up, slot.index), (0, 0)),
            other => panic!("expected slot, got {other:?}"),
        }
        assert_eq!(table.resolve("c"), Resolution::Unknown);
    }

    #[test]
    fn boundary_registers_captures() {
        let mut table = SymbolTable::new();
        table.push_frame([("hp".to_string(), Type::int())]);
        table.push_boundary(
            [("x".to_string(), Type::any())],
            "recurse".to_string(),
            Type::any(),
        );
        // param resolves in place
        match table.resolve("x") {
            Resolution::Slot(slot, _) => assert_eq!((slot.frames_up, slot.index), (0, 0)),
            other => panic!("{other:?}"),
        }
        // outer name becomes capture slot 2 (param, self, capture)
        match table.resolve("hp") {
            Resolution::Slot(slot, ty) => {
                assert_eq!((slot.frames_up, slot.index), (0, 2));
                assert_eq!(ty, Type::int());
            }
            other => panic!("{other:?}"),
        }
        let frame = table.pop_frame();
        let captures = SymbolTable::captures_of(&frame);
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].0, "hp");
        assert_eq!((captures[0].1.frames_up, captures[0].1.index), (0, 0));
    }

    #[test]
    fn narrowing_restores() {
        let mut table = SymbolTable::new();
        table.push_frame([("a".to_string(), Type::any())]);
        let saved = table.narrow("a", Type::int()).expect("visible");
        assert_eq!(table.peek("a").map(|(_, _, t)| t.clone()), Some(Type::int()));
        table.restore([saved]);
        assert_eq!(table.peek("a").map(|(_, _, t)| t.clone()), Some(Type::any()));
    }
}

//! Data transfer from outputs to the inputs they feed.
//!
//! Every rank publishes its output segments, the segments are gathered into the global flattened
//! output buffer, and each connected local input copies its source's span out of it.

use crate::{
    assembler::{Assembler, IndexSpan},
    comm::{all_gather, ProcessGroup},
    system::Role,
    vector::Vector,
    Error,
};

/// Output segment as exchanged between ranks. Values travel as raw bits so that non-finite
/// numbers survive encoding.
type Segment = (usize, Vec<u64>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    spans: Vec<Option<IndexSpan>>,
    output_len: usize,
}

impl Transfer {
    /// Build the transfer plan of this rank from a frozen assembler.
    pub fn from_assembler(assembler: &Assembler) -> Result<Self, Error> {
        if !assembler.is_frozen() {
            return Err(Error::NotSetUp);
        }
        Ok(Self {
            spans: assembler.input_global_index_map().to_vec(),
            output_len: assembler.global_size(Role::Output),
        })
    }

    /// Copy every connected input of `inputs` from its source in `outputs`.
    ///
    /// This is a collective: every rank of `comm` must call it.
    pub fn apply(
        &self,
        comm: &dyn ProcessGroup,
        outputs: &Vector,
        inputs: &mut Vector,
    ) -> Result<(), Error> {
        if outputs.layout().role() != Role::Output || outputs.layout().global_len() != self.output_len
        {
            return Err(Error::LayoutMismatch(format!(
                "{} vector is not an output buffer of this schema",
                outputs.kind()
            )));
        }
        if inputs.layout().role() != Role::Input
            || inputs.layout().entries().len() != self.spans.len()
        {
            return Err(Error::LayoutMismatch(format!(
                "{} vector is not an input buffer of this schema",
                inputs.kind()
            )));
        }

        let local: Vec<Segment> = outputs
            .owned_segments()
            .map(|(entry, values)| {
                (
                    entry.global_offset,
                    values.iter().map(|v| v.to_bits()).collect(),
                )
            })
            .collect();

        let mut global = vec![0.0; self.output_len];
        for (offset, bits) in all_gather(comm, &local)?.into_iter().flatten() {
            let target = global.get_mut(offset..offset + bits.len()).ok_or_else(|| {
                Error::LayoutMismatch(format!("output segment at {offset} is out of range"))
            })?;
            for (value, bits) in target.iter_mut().zip(bits) {
                *value = f64::from_bits(bits);
            }
        }

        let entries = inputs.layout().clone();
        let data = inputs.as_mut_slice();
        for (entry, span) in entries.entries().iter().zip(&self.spans) {
            let Some(span) = span else { continue };
            let source = global.get(span.range()).ok_or_else(|| {
                Error::LayoutMismatch(format!("span {span:?} is out of range"))
            })?;
            let target = &mut data[entry.offset..entry.offset + entry.len];
            if span.len == entry.len {
                target.copy_from_slice(source);
            } else if span.len == 1 {
                target.fill(source[0]);
            } else {
                return Err(Error::LayoutMismatch(format!(
                    "input `{}` of size {} cannot receive a span of {}",
                    entry.name, entry.len, span.len
                )));
            }
        }

        log::trace!(
            "rank {}: transferred {} inputs",
            comm.rank(),
            self.spans.iter().flatten().count()
        );
        Ok(())
    }
}

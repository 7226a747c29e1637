use crate::client::Signer;
use crate::error::{Result, VoteError};
use crate::types::*;
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info};

/// Size of the secp256k1 signature the signer writes into witness 0.
pub const LOCK_SIGNATURE_PLACEHOLDER: usize = 65;

/// Chain transaction before and after signing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transaction {
    pub version: u32,
    pub cell_deps: Vec<CellDep>,
    pub header_deps: Vec<H256>,
    pub inputs: Vec<CellInput>,
    pub outputs: Vec<CellOutput>,
    pub outputs_data: Vec<Vec<u8>>,
    pub witnesses: Vec<Vec<u8>>,
}

fn script_size(script: &Script) -> usize {
    // table header + code_hash + hash_type + args (Bytes)
    16 + 32 + 1 + 4 + script.args.len()
}

fn cell_output_size(output: &CellOutput) -> usize {
    16 + 8 + script_size(&output.lock) + output.type_.as_ref().map_or(0, script_size)
}

fn bytes_vec_size(items: &[Vec<u8>]) -> usize {
    4 + 4 * items.len() + items.iter().map(|b| 4 + b.len()).sum::<usize>()
}

impl Transaction {
    /// Molecule-serialized size of the transaction.
    pub fn serialized_size(&self) -> usize {
        let outputs = 4
            + 4 * self.outputs.len()
            + self.outputs.iter().map(cell_output_size).sum::<usize>();
        let raw = 28
            + 4
            + (4 + 37 * self.cell_deps.len())
            + (4 + 32 * self.header_deps.len())
            + (4 + 44 * self.inputs.len())
            + outputs
            + bytes_vec_size(&self.outputs_data);
        12 + raw + bytes_vec_size(&self.witnesses)
    }

    /// Fee at `fee_rate` shannons per 1000 bytes, counting the block's
    /// per-transaction offset.
    pub fn fee(&self, fee_rate: u64) -> u64 {
        let size = (self.serialized_size() + 4) as u64;
        (size * fee_rate).div_ceil(1000)
    }

    pub fn outputs_capacity(&self) -> u64 {
        self.outputs.iter().map(|o| o.capacity).sum()
    }
}

/// Minimal capacity of a cell holding `data_len` bytes, in shannons.
pub fn occupied_capacity(lock: &Script, type_: Option<&Script>, data_len: usize) -> u64 {
    let bytes = 8 + lock.occupied_bytes() + type_.map_or(0, Script::occupied_bytes) + data_len;
    bytes as u64 * ONE_CKB
}

/// Builder for draft transactions.
#[derive(Debug, Default)]
pub struct TransactionBuilder {
    tx: Transaction,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cell_dep(mut self, dep: CellDep) -> Self {
        self.tx.cell_deps.push(dep);
        self
    }

    /// Output sized to its minimal occupied capacity.
    pub fn output(mut self, lock: Script, type_: Option<Script>, data: Vec<u8>) -> Self {
        let capacity = occupied_capacity(&lock, type_.as_ref(), data.len());
        self.tx.outputs.push(CellOutput {
            capacity,
            lock,
            type_,
        });
        self.tx.outputs_data.push(data);
        self
    }

    pub fn witness(mut self, witness: Vec<u8>) -> Self {
        self.tx.witnesses.push(witness);
        self
    }

    pub fn build(self) -> Result<Transaction> {
        if self.tx.outputs.is_empty() {
            return Err(VoteError::Validation("transaction has no outputs".into()));
        }
        Ok(self.tx)
    }
}

/// Molecule `WitnessArgs`: three optional byte fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WitnessArgs {
    pub lock: Option<Vec<u8>>,
    pub input_type: Option<Vec<u8>>,
    pub output_type: Option<Vec<u8>>,
}

impl WitnessArgs {
    pub fn to_molecule(&self) -> Vec<u8> {
        let fields = [&self.lock, &self.input_type, &self.output_type];
        let sizes: Vec<usize> = fields
            .iter()
            .map(|f| f.as_ref().map_or(0, |b| 4 + b.len()))
            .collect();
        let total = 16 + sizes.iter().sum::<usize>();

        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&(total as u32).to_le_bytes());
        let mut offset = 16;
        for size in &sizes {
            buf.extend_from_slice(&(offset as u32).to_le_bytes());
            offset += size;
        }
        for field in fields.iter().filter_map(|f| f.as_ref()) {
            buf.extend_from_slice(&(field.len() as u32).to_le_bytes());
            buf.extend_from_slice(field);
        }
        buf
    }

    pub fn from_molecule(data: &[u8]) -> Result<Self> {
        let malformed = |why: &str| VoteError::Parse(format!("witness args: {}", why));
        if data.len() < 16 {
            return Err(malformed("shorter than header"));
        }
        let total = LittleEndian::read_u32(&data[0..4]) as usize;
        if total != data.len() {
            return Err(malformed("total size mismatch"));
        }
        let offsets = [
            LittleEndian::read_u32(&data[4..8]) as usize,
            LittleEndian::read_u32(&data[8..12]) as usize,
            LittleEndian::read_u32(&data[12..16]) as usize,
            total,
        ];
        if offsets[0] != 16 {
            return Err(malformed("unexpected field count"));
        }
        let mut fields = Vec::with_capacity(3);
        for window in offsets.windows(2) {
            let (start, end) = (window[0], window[1]);
            if start > end || end > total {
                return Err(malformed("field offsets out of order"));
            }
            if start == end {
                fields.push(None);
                continue;
            }
            if end - start < 4 {
                return Err(malformed("field shorter than its length prefix"));
            }
            let len = LittleEndian::read_u32(&data[start..start + 4]) as usize;
            if len != end - start - 4 {
                return Err(malformed("field length mismatch"));
            }
            fields.push(Some(data[start + 4..end].to_vec()));
        }
        let mut fields = fields.into_iter();
        Ok(Self {
            lock: fields.next().flatten(),
            input_type: fields.next().flatten(),
            output_type: fields.next().flatten(),
        })
    }
}

/// Draft transaction plus the single-use right to complete and broadcast it.
///
/// Not `Clone`: a record is committed through this one handle only.
///
/// ```compile_fail
/// use ringvote_sdk::transaction::prepare_cell;
/// use ringvote_sdk::types::{HashType, Script, H256};
///
/// let lock = Script::new(H256([0; 32]), HashType::Type, vec![]);
/// let prepared = prepare_cell("candidates", vec![1], &lock).unwrap();
/// let _copy = prepared.clone();
/// ```
#[derive(Debug)]
pub struct PreparedTransaction {
    label: String,
    draft: Transaction,
    committed: Option<H256>,
}

impl PreparedTransaction {
    pub(crate) fn new(label: impl Into<String>, draft: Transaction) -> Self {
        Self {
            label: label.into(),
            draft,
            committed: None,
        }
    }

    /// Human-readable name used in logs and progress events.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The unfunded draft; inputs and fees are added at commit time.
    pub fn draft(&self) -> &Transaction {
        &self.draft
    }

    /// Capacity the draft's outputs lock up, before fees.
    pub fn required_capacity(&self) -> u64 {
        self.draft.outputs_capacity()
    }

    /// Hash of the broadcast transaction once committed.
    pub fn committed_hash(&self) -> Option<H256> {
        self.committed
    }

    pub fn is_committed(&self) -> bool {
        self.committed.is_some()
    }

    /// Fund, sign and broadcast the draft. Fails fast on a second call.
    pub async fn commit(&mut self, signer: &dyn Signer, fee_rate: u64) -> Result<H256> {
        if let Some(hash) = self.committed {
            return Err(VoteError::AlreadyCommitted(hash));
        }

        let account = signer.address_objs().await?;
        let change_lock = account
            .first()
            .map(|a| a.lock.clone())
            .ok_or_else(|| VoteError::Validation("signer exposes no address".into()))?;
        let cells = signer.live_cells().await?;

        let mut tx = self.draft.clone();
        attach_lock_placeholder(&mut tx)?;
        complete_inputs(&mut tx, &cells, &change_lock, fee_rate)?;

        let signed = signer.sign_transaction(tx).await?;
        let hash = signer.send_transaction(&signed).await?;
        info!("{} committed as {}", self.label, hash);
        self.committed = Some(hash);
        Ok(hash)
    }
}

/// Publish `data` as the single output of a new cell owned by `lock`.
pub fn prepare_cell(label: impl Into<String>, data: Vec<u8>, lock: &Script) -> Result<PreparedTransaction> {
    let draft = TransactionBuilder::new()
        .output(lock.clone(), None, data)
        .build()?;
    let prepared = PreparedTransaction::new(label, draft);
    debug!(
        "prepared {} ({} CKB)",
        prepared.label,
        prepared.required_capacity() / ONE_CKB
    );
    Ok(prepared)
}

fn attach_lock_placeholder(tx: &mut Transaction) -> Result<()> {
    let mut args = match tx.witnesses.first() {
        Some(existing) if !existing.is_empty() => WitnessArgs::from_molecule(existing)?,
        _ => WitnessArgs::default(),
    };
    args.lock = Some(vec![0u8; LOCK_SIGNATURE_PLACEHOLDER]);
    let encoded = args.to_molecule();
    match tx.witnesses.first_mut() {
        Some(first) => *first = encoded,
        None => tx.witnesses.push(encoded),
    }
    Ok(())
}

/// Add funding inputs one by one until outputs and fee are covered.
///
/// A change output is preferred; the surplus is left as fee only once the
/// last available cell has been used and change would be below its own
/// occupied capacity.
fn complete_inputs(
    tx: &mut Transaction,
    cells: &[LiveCell],
    change_lock: &Script,
    fee_rate: u64,
) -> Result<()> {
    let outputs = tx.outputs_capacity();
    let min_change = occupied_capacity(change_lock, None, 0);
    let mut total_in: u64 = 0;

    for (i, cell) in cells.iter().enumerate() {
        tx.inputs.push(CellInput::new(cell.out_point));
        total_in += cell.capacity;

        tx.outputs.push(CellOutput {
            capacity: 0,
            lock: change_lock.clone(),
            type_: None,
        });
        tx.outputs_data.push(Vec::new());
        let fee = tx.fee(fee_rate);
        if let Some(change) = total_in.checked_sub(outputs + fee) {
            if change >= min_change {
                if let Some(out) = tx.outputs.last_mut() {
                    out.capacity = change;
                }
                debug!("funded with {} inputs, change {}", tx.inputs.len(), change);
                return Ok(());
            }
        }
        tx.outputs.pop();
        tx.outputs_data.pop();

        let fee = tx.fee(fee_rate);
        let is_last = i + 1 == cells.len();
        if is_last && total_in >= outputs + fee {
            debug!(
                "funded with {} inputs, {} left as fee",
                tx.inputs.len(),
                total_in - outputs
            );
            return Ok(());
        }
    }

    Err(VoteError::InsufficientBalance {
        required: outputs + tx.fee(fee_rate),
        available: total_in,
    })
}

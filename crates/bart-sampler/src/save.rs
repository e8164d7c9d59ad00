//! State-file persistence.
//!
//! The file starts with the 8-byte ASCII version `"00.08.00"`, followed
//! by big-endian control, model, data, and state blocks. Trees travel as
//! newline-free topology strings plus the raw observation-index buffer
//! and fixed-width leaf parameters; the RNG travels as its
//! `(seed, draws)` pair. A failed save unlinks the partial file.

use crate::control::Control;
use crate::data::{Data, VariableType};
use crate::fit::BartFit;
use crate::model::{EndNodeSpec, Model};
use crate::node::LeafScratch;
use crate::tree::Tree;
use bart_core::{
    errors::{Error, Result},
    ObsIndex, Real, Size,
};
use bart_math::rng::MersenneTwister;
use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Version prefix of the state-file format.
pub const STATE_FILE_VERSION: &[u8; 8] = b"00.08.00";

/// Persist a fit. Returns `false` — after unlinking the partial file —
/// when any write fails.
pub fn save_to_file(fit: &BartFit, path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    match try_save(fit, path) {
        Ok(()) => {
            log::info!("saved sampler state to {}", path.display());
            true
        }
        Err(e) => {
            log::warn!("saving sampler state failed: {e}");
            let _ = std::fs::remove_file(path);
            false
        }
    }
}

fn try_save(fit: &BartFit, path: &Path) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    w.write_all(STATE_FILE_VERSION)?;
    write_control(&mut w, &fit.control)?;
    write_model(&mut w, &fit.model)?;
    write_data(&mut w, &fit.data)?;
    write_state(&mut w, fit)?;
    w.flush()
}

/// Reconstruct a fit from a state file.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<BartFit> {
    let file = File::open(path.as_ref())?;
    let mut r = BufReader::new(file);

    let mut version = [0u8; 8];
    r.read_exact(&mut version)?;
    if &version != STATE_FILE_VERSION {
        return Err(Error::CorruptState(format!(
            "unsupported state file version {:?}",
            String::from_utf8_lossy(&version)
        )));
    }

    let control = read_control(&mut r)?;
    let model = read_model(&mut r)?;
    let data = read_data(&mut r)?;
    let mut fit = BartFit::new(control, model, data)?;
    read_state(&mut r, &mut fit)?;
    log::info!("loaded sampler state ({} trees)", fit.control.num_trees);
    Ok(fit)
}

// ─── Control block ───────────────────────────────────────────────────────

fn write_control(w: &mut impl Write, control: &Control) -> std::io::Result<()> {
    for flag in [
        control.response_is_binary,
        control.verbose,
        control.keep_training_fits,
        control.use_quantiles,
        control.match_bayes_tree,
    ] {
        w.write_u8(flag as u8)?;
    }
    for count in [
        control.num_samples,
        control.num_burn_in,
        control.num_trees,
        control.num_threads,
        control.tree_thinning_rate,
        control.print_every,
        control.print_cutoffs,
    ] {
        w.write_u64::<BE>(count as u64)?;
    }
    w.write_u64::<BE>(control.rng_seed)
}

fn read_control(r: &mut impl Read) -> Result<Control> {
    let mut flags = [false; 5];
    for f in &mut flags {
        *f = r.read_u8()? != 0;
    }
    let mut counts = [0 as Size; 7];
    for c in &mut counts {
        *c = r.read_u64::<BE>()? as Size;
    }
    Ok(Control {
        response_is_binary: flags[0],
        verbose: flags[1],
        keep_training_fits: flags[2],
        use_quantiles: flags[3],
        match_bayes_tree: flags[4],
        num_samples: counts[0],
        num_burn_in: counts[1],
        num_trees: counts[2],
        num_threads: counts[3],
        tree_thinning_rate: counts[4],
        print_every: counts[5],
        print_cutoffs: counts[6],
        rng_seed: r.read_u64::<BE>()?,
    })
}

// ─── Model block ─────────────────────────────────────────────────────────

fn write_model(w: &mut impl Write, model: &Model) -> std::io::Result<()> {
    for v in [
        model.birth_or_death_probability,
        model.swap_probability,
        model.change_probability,
        model.birth_probability,
        model.base,
        model.power,
    ] {
        w.write_f64::<BE>(v)?;
    }
    match &model.end_node {
        EndNodeSpec::MeanNormal { k } => {
            w.write_u8(0)?;
            w.write_f64::<BE>(*k)?;
        }
        EndNodeSpec::LinRegNormal { precisions } => {
            w.write_u8(1)?;
            w.write_u64::<BE>(precisions.len() as u64)?;
            for &l in precisions {
                w.write_f64::<BE>(l)?;
            }
        }
    }
    w.write_f64::<BE>(model.sigma_df)?;
    w.write_f64::<BE>(model.sigma_quantile)
}

fn read_model(r: &mut impl Read) -> Result<Model> {
    let mut values = [0.0; 6];
    for v in &mut values {
        *v = r.read_f64::<BE>()?;
    }
    let end_node = match r.read_u8()? {
        0 => EndNodeSpec::MeanNormal {
            k: r.read_f64::<BE>()?,
        },
        1 => {
            let len = r.read_u64::<BE>()? as Size;
            let mut precisions = vec![0.0; len];
            for p in &mut precisions {
                *p = r.read_f64::<BE>()?;
            }
            EndNodeSpec::LinRegNormal { precisions }
        }
        tag => {
            return Err(Error::CorruptState(format!(
                "unknown end-node tag {tag}"
            )))
        }
    };
    Ok(Model {
        birth_or_death_probability: values[0],
        swap_probability: values[1],
        change_probability: values[2],
        birth_probability: values[3],
        base: values[4],
        power: values[5],
        end_node,
        sigma_df: r.read_f64::<BE>()?,
        sigma_quantile: r.read_f64::<BE>()?,
    })
}

// ─── Data block ──────────────────────────────────────────────────────────

fn write_reals(w: &mut impl Write, values: &[Real]) -> std::io::Result<()> {
    for &v in values {
        w.write_f64::<BE>(v)?;
    }
    Ok(())
}

fn read_reals(r: &mut impl Read, len: Size) -> std::io::Result<Vec<Real>> {
    let mut out = vec![0.0; len];
    for v in &mut out {
        *v = r.read_f64::<BE>()?;
    }
    Ok(out)
}

fn write_optional_reals(w: &mut impl Write, values: Option<&[Real]>) -> std::io::Result<()> {
    match values {
        Some(values) => {
            w.write_u8(1)?;
            write_reals(w, values)
        }
        None => w.write_u8(0),
    }
}

fn read_optional_reals(r: &mut impl Read, len: Size) -> std::io::Result<Option<Vec<Real>>> {
    Ok(match r.read_u8()? {
        0 => None,
        _ => Some(read_reals(r, len)?),
    })
}

fn write_data(w: &mut impl Write, data: &Data) -> std::io::Result<()> {
    let (n, p, m) = (
        data.num_observations(),
        data.num_predictors(),
        data.num_test_observations(),
    );
    w.write_u64::<BE>(n as u64)?;
    w.write_u64::<BE>(p as u64)?;
    for j in 0..p {
        w.write_u8(match data.variable_type(j) {
            VariableType::Ordinal => 0,
            VariableType::Categorical => 1,
        })?;
        w.write_u64::<BE>(data.max_num_cuts(j) as u64)?;
    }
    for j in 0..p {
        write_reals(w, data.column(j))?;
    }
    write_reals(w, data.y())?;
    write_optional_reals(w, data.weights())?;
    write_optional_reals(w, data.offset())?;
    w.write_f64::<BE>(data.sigma_estimate())?;
    w.write_u64::<BE>(m as u64)?;
    for i in 0..m {
        write_reals(w, data.test_row(i))?;
    }
    write_optional_reals(w, data.test_offset())
}

fn read_data(r: &mut impl Read) -> Result<Data> {
    let n = r.read_u64::<BE>()? as Size;
    let p = r.read_u64::<BE>()? as Size;
    let mut variable_types = Vec::with_capacity(p);
    let mut max_num_cuts = Vec::with_capacity(p);
    for _ in 0..p {
        variable_types.push(match r.read_u8()? {
            0 => VariableType::Ordinal,
            1 => VariableType::Categorical,
            tag => {
                return Err(Error::CorruptState(format!(
                    "unknown variable type tag {tag}"
                )))
            }
        });
        max_num_cuts.push(r.read_u64::<BE>()? as Size);
    }
    let mut x = Vec::with_capacity(n * p);
    for _ in 0..p {
        x.extend(read_reals(r, n)?);
    }
    let y = read_reals(r, n)?;
    let weights = read_optional_reals(r, n)?;
    let offset = read_optional_reals(r, n)?;
    let sigma_estimate = r.read_f64::<BE>()?;
    let m = r.read_u64::<BE>()? as Size;
    let mut x_test = Vec::with_capacity(m * p);
    for _ in 0..m {
        x_test.extend(read_reals(r, p)?);
    }
    let test_offset = read_optional_reals(r, m)?;

    let mut data = Data::new(y, x, variable_types, max_num_cuts, sigma_estimate)?;
    if let Some(weights) = weights {
        data = data.with_weights(weights)?;
    }
    if let Some(offset) = offset {
        data = data.with_offset(offset)?;
    }
    if m > 0 {
        data = data.with_test_predictors(x_test, m)?;
        if let Some(test_offset) = test_offset {
            data = data.with_test_offset(test_offset)?;
        }
    }
    Ok(data)
}

// ─── State block ─────────────────────────────────────────────────────────

fn write_state(w: &mut impl Write, fit: &BartFit) -> std::io::Result<()> {
    w.write_f64::<BE>(fit.scale.min)?;
    w.write_f64::<BE>(fit.scale.max)?;
    w.write_f64::<BE>(fit.scale.range)?;
    w.write_f64::<BE>(fit.sigma)?;
    write_reals(w, &fit.y_scaled)?;
    for tree in &fit.trees {
        let topology = tree.serialize();
        w.write_u64::<BE>(topology.len() as u64)?;
        w.write_all(topology.as_bytes())?;
        for &i in tree.obs() {
            w.write_u32::<BE>(i)?;
        }
        let leaves = tree.leaves();
        w.write_u64::<BE>(leaves.len() as u64)?;
        for id in leaves {
            write_reals(w, &fit.end_node.parameters(tree.node(id).scratch()))?;
        }
    }
    write_reals(w, &fit.tree_fits)?;
    write_reals(w, &fit.tree_test_fits)?;
    write_reals(w, &fit.total_fits)?;
    write_reals(w, &fit.total_test_fits)?;
    w.write_u64::<BE>(fit.rng.seed())?;
    w.write_u64::<BE>(fit.rng.draws())?;
    w.write_f64::<BE>(fit.running_time)
}

fn read_state(r: &mut impl Read, fit: &mut BartFit) -> Result<()> {
    let n = fit.data.num_observations();
    let m = fit.data.num_test_observations();
    let num_trees = fit.control.num_trees;

    fit.scale.min = r.read_f64::<BE>()?;
    fit.scale.max = r.read_f64::<BE>()?;
    fit.scale.range = r.read_f64::<BE>()?;
    fit.sigma = r.read_f64::<BE>()?;
    fit.y_scaled = read_reals(r, n)?;

    let placeholder = fit.end_node.empty_scratch();
    let num_parameters = fit.end_node.num_parameters();
    for t in 0..num_trees {
        let len = r.read_u64::<BE>()? as Size;
        let mut topology = vec![0u8; len];
        r.read_exact(&mut topology)?;
        let topology = String::from_utf8(topology)
            .map_err(|_| Error::CorruptState("tree topology is not UTF-8".into()))?;
        let mut tree = Tree::parse(&topology, n, &placeholder)?;
        let mut obs: Vec<ObsIndex> = vec![0; n];
        for i in &mut obs {
            *i = r.read_u32::<BE>()?;
        }
        tree.set_obs(obs);
        if !tree.refresh_from_root(&fit.data, &fit.cuts) {
            return Err(Error::CorruptState(format!(
                "tree {t} has an empty leaf under the stored data"
            )));
        }
        let num_leaves = r.read_u64::<BE>()? as Size;
        let leaves = tree.leaves();
        if leaves.len() != num_leaves {
            return Err(Error::CorruptState(format!(
                "tree {t} stores {num_leaves} leaves, topology has {}",
                leaves.len()
            )));
        }
        for id in leaves {
            let params = read_reals(r, num_parameters)?;
            let mut scratch = fit.end_node.scratch_with_parameters(&params);
            if let LeafScratch::MeanNormal {
                num_effective_obs, ..
            } = &mut scratch
            {
                *num_effective_obs = tree
                    .leaf_indices(id)
                    .iter()
                    .map(|&i| fit.data.weights().map_or(1.0, |w| w[i as Size]))
                    .sum();
            }
            tree.set_leaf_scratch(id, scratch);
        }
        tree.enumerate_leaves();
        fit.trees[t] = tree;
    }
    fit.tree_fits = read_reals(r, n * num_trees)?;
    fit.tree_test_fits = read_reals(r, m * num_trees)?;
    fit.total_fits = read_reals(r, n)?;
    fit.total_test_fits = read_reals(r, m)?;
    let seed = r.read_u64::<BE>()?;
    let draws = r.read_u64::<BE>()?;
    fit.rng = MersenneTwister::recover(seed, draws);
    fit.running_time = r.read_f64::<BE>()?;
    Ok(())
}

use bert_engine::{BertConfig, BertLabeler, HeadKind, Mode};
use candle_core::{Device, Tensor};

fn tiny_config(head: HeadKind) -> BertConfig {
    BertConfig {
        vocab_size: 50,
        hidden_dim: 16,
        num_layers: 2,
        num_heads: 4,
        intermediate_dim: 32,
        max_position_embeddings: 8,
        type_vocab_size: 2,
        num_labels: 3,
        dropout: 0.5,
        layer_norm_eps: 1e-12,
        pad_token_id: 0,
        head,
    }
}

fn batch(device: &Device) -> anyhow::Result<(Tensor, Tensor)> {
    let input_ids = Tensor::new(&[[2u32, 7, 9, 0], [4, 5, 0, 0]], device)?;
    let token_type_ids = Tensor::new(&[[0u32, 0, 1, 0], [0, 1, 0, 0]], device)?;
    Ok((input_ids, token_type_ids))
}

#[test]
fn test_sequence_head_loss_and_grads() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let model = BertLabeler::new(tiny_config(HeadKind::Sequence), &device)?;
    let (input_ids, token_type_ids) = batch(&device)?;
    let labels = Tensor::new(&[1u32, 2], &device)?;

    let logits = model.forward(&input_ids, &token_type_ids)?;
    assert_eq!(logits.dims(), &[2, 3]);

    let loss = model.forward_loss(&input_ids, &token_type_ids, &labels)?;
    let value = loss.to_scalar::<f32>()?;
    assert!(value.is_finite() && value > 0.0);

    // Every parameter on the path receives a gradient
    let grads = loss.backward()?;
    let (backbone, head) = model.split_vars()?;
    assert!(!backbone.is_empty());
    assert_eq!(head.len(), 2); // classifier weight + bias
    for var in head.iter() {
        assert!(grads.get(var.as_tensor()).is_some());
    }
    Ok(())
}

#[test]
fn test_token_head_shapes() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let model = BertLabeler::new(tiny_config(HeadKind::Token), &device)?;
    let (input_ids, token_type_ids) = batch(&device)?;
    let labels = Tensor::new(&[[0u32, 1, 2, 0], [2, 1, 0, 0]], &device)?;

    let logits = model.forward(&input_ids, &token_type_ids)?;
    assert_eq!(logits.dims(), &[2, 4, 3]);

    let loss = model.forward_loss(&input_ids, &token_type_ids, &labels)?;
    assert!(loss.to_scalar::<f32>()?.is_finite());

    // Token head has no pooler
    let names: Vec<String> = model.named_vars()?.into_iter().map(|(n, _)| n).collect();
    assert!(!names.iter().any(|n| n.contains("pooler")));
    Ok(())
}

#[test]
fn test_eval_mode_is_deterministic() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let mut model = BertLabeler::new(tiny_config(HeadKind::Sequence), &device)?;
    let (input_ids, token_type_ids) = batch(&device)?;

    model.set_mode(Mode::Eval);
    assert_eq!(model.mode(), Mode::Eval);
    let a = model.forward(&input_ids, &token_type_ids)?;
    let b = model.forward(&input_ids, &token_type_ids)?;
    let diff = (a - b)?.abs()?.max_all()?.to_scalar::<f32>()?;
    assert_eq!(diff, 0.0);
    Ok(())
}

#[test]
fn test_save_and_load_weights() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("weights.safetensors");

    let mut model = BertLabeler::new(tiny_config(HeadKind::Sequence), &device)?;
    model.set_mode(Mode::Eval);
    model.save(&path)?;

    let mut restored = BertLabeler::new(tiny_config(HeadKind::Sequence), &device)?;
    restored.set_mode(Mode::Eval);
    restored.load_weights(&path)?;

    let (input_ids, token_type_ids) = batch(&device)?;
    let a = model.forward(&input_ids, &token_type_ids)?;
    let b = restored.forward(&input_ids, &token_type_ids)?;
    let diff = (a - b)?.abs()?.max_all()?.to_scalar::<f32>()?;
    assert!(diff < 1e-6);
    Ok(())
}

mod attention_test;
